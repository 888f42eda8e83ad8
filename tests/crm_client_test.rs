use httpmock::prelude::*;
use httpmock::Method::PATCH;
use schoolhouse_ops::config::toml_config::CrmConfig;
use schoolhouse_ops::{CrmApi, CrmClient, OpsError};
use serde_json::{json, Map, Value};

fn config(server: &MockServer) -> CrmConfig {
    CrmConfig {
        login_url: server.base_url(),
        instance_url: server.base_url(),
        api_version: None,
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "ops@example.org".to_string(),
        password: "pw".to_string(),
        security_token: Some("TOKEN".to_string()),
        timeout_seconds: Some(5),
    }
}

fn login_mock<'a>(server: &'a MockServer) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path("/services/oauth2/token")
            .body_contains("grant_type=password")
            .body_contains("password=pwTOKEN");
        then.status(200).json_body(json!({
            "access_token": "session-1",
            "instance_url": server.base_url(),
        }));
    })
}

#[tokio::test]
async fn query_follows_next_records_url_and_strips_attributes() {
    let server = MockServer::start();
    let login = login_mock(&server);
    let first = server.mock(|when, then| {
        when.method(GET)
            .path("/services/data/v58.0/query")
            .query_param("q", "SELECT Id, Name FROM Account")
            .header("authorization", "Bearer session-1");
        then.status(200).json_body(json!({
            "done": false,
            "nextRecordsUrl": "/services/data/v58.0/query/01gD0000002HU6KIAW-2000",
            "records": [
                {"attributes": {"type": "Account"}, "Id": "001A", "Name": "Hope High School"}
            ]
        }));
    });
    let second = server.mock(|when, then| {
        when.method(GET)
            .path("/services/data/v58.0/query/01gD0000002HU6KIAW-2000");
        then.status(200).json_body(json!({
            "done": true,
            "records": [
                {"attributes": {"type": "Account"}, "Id": "001B", "Name": "Lake Elementary"}
            ]
        }));
    });

    let client = CrmClient::new(config(&server)).unwrap();
    let records = client.query_all("SELECT Id, Name FROM Account").await.unwrap();

    login.assert();
    first.assert();
    second.assert();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].str("Name").as_deref(), Some("Lake Elementary"));
    assert!(records[0].data.get("attributes").is_none());
}

#[tokio::test]
async fn expired_session_logs_in_again_once() {
    let server = MockServer::start();
    let login = login_mock(&server);
    let query = server.mock(|when, then| {
        when.method(GET).path("/services/data/v58.0/query");
        then.status(401).json_body(json!([
            {"message": "Session expired or invalid", "errorCode": "INVALID_SESSION_ID"}
        ]));
    });

    let client = CrmClient::new(config(&server)).unwrap();
    let result = client.query_all("SELECT Id FROM Account").await;

    assert!(matches!(result, Err(OpsError::SessionExpired)));
    assert_eq!(login.hits(), 2);
    assert_eq!(query.hits(), 2);
}

#[tokio::test]
async fn update_patches_the_record() {
    let server = MockServer::start();
    login_mock(&server);
    let patch = server.mock(|when, then| {
        when.method(PATCH)
            .path("/services/data/v58.0/sobjects/Section__c/a0B1")
            .json_body(json!({"Active__c": false}));
        then.status(204);
    });

    let client = CrmClient::new(config(&server)).unwrap();
    let mut fields = Map::new();
    fields.insert("Active__c".to_string(), Value::Bool(false));
    client.update("Section__c", "a0B1", fields).await.unwrap();

    patch.assert();
}

#[tokio::test]
async fn api_errors_carry_status_and_message() {
    let server = MockServer::start();
    login_mock(&server);
    server.mock(|when, then| {
        when.method(GET).path("/services/data/v58.0/query");
        then.status(400).json_body(json!([
            {"message": "No such column 'Nope__c' on entity 'Account'", "errorCode": "INVALID_FIELD"}
        ]));
    });

    let client = CrmClient::new(config(&server)).unwrap();
    match client.query_all("SELECT Nope__c FROM Account").await {
        Err(OpsError::Crm { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("Nope__c"));
        }
        other => panic!("unexpected result {:?}", other.map(|r| r.len())),
    }
}

#[tokio::test]
async fn describe_lists_sorted_field_names() {
    let server = MockServer::start();
    login_mock(&server);
    server.mock(|when, then| {
        when.method(GET)
            .path("/services/data/v58.0/sobjects/Section__c/describe");
        then.status(200).json_body(json!({
            "fields": [{"name": "Name"}, {"name": "Active__c"}, {"name": "Id"}]
        }));
    });

    let client = CrmClient::new(config(&server)).unwrap();
    let fields = client.describe_fields("Section__c").await.unwrap();
    assert_eq!(fields, vec!["Active__c", "Id", "Name"]);
}

#[tokio::test]
async fn report_export_drops_the_footer() {
    let server = MockServer::start();
    login_mock(&server);
    let report = server.mock(|when, then| {
        when.method(GET)
            .path("/00O36000007Kx1b")
            .query_param("export", "1")
            .query_param("xf", "csv")
            .header("cookie", "sid=session-1");
        then.status(200).body(
            "\"Student\",\"Indicator Area\"\n\"Ana Ruiz\",\"Math\"\n\"Ben Cho\",\"ELA/Literacy\"\n\n\"Indicator Areas\"\n\"Copyright (c) 2000-2019\"\n",
        );
    });

    let client = CrmClient::new(config(&server)).unwrap();
    let table = client.export_report("00O36000007Kx1b").await.unwrap();

    report.assert();
    assert_eq!(table.columns, vec!["Student", "Indicator Area"]);
    assert_eq!(table.column_strings("Indicator Area"), vec!["Math", "ELA/Literacy"]);
}

#[tokio::test]
async fn object_reference_maps_names_to_labels() {
    let server = MockServer::start();
    login_mock(&server);
    server.mock(|when, then| {
        when.method(GET).path("/services/data/v58.0/sobjects");
        then.status(200).json_body(json!({
            "sobjects": [
                {"name": "Section__c", "label": "Section"},
                {"name": "Account", "label": "School"}
            ]
        }));
    });

    let client = CrmClient::new(config(&server)).unwrap();
    let objects = client.object_reference().await.unwrap();
    assert_eq!(objects.keys().collect::<Vec<_>>(), vec!["Account", "Section__c"]);
    assert_eq!(objects["Section__c"], "Section");
}
