use crate::config::toml_config::CrmConfig;
use crate::domain::model::{Record, Table};
use crate::domain::ports::CrmApi;
use crate::utils::error::{OpsError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_API_VERSION: &str = "58.0";

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    records: Vec<Map<String, Value>>,
    #[serde(default)]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectDescribe {
    fields: Vec<DescribeField>,
}

#[derive(Debug, Deserialize)]
struct GlobalObject {
    name: String,
    label: String,
}

#[derive(Debug, Deserialize)]
struct GlobalDescribe {
    sobjects: Vec<GlobalObject>,
}

/// REST client for the CRM. Logs in lazily with the username-password grant
/// and logs in again once when the session has expired.
pub struct CrmClient {
    client: Client,
    config: CrmConfig,
    session: RwLock<Option<AccessToken>>,
}

impl CrmClient {
    pub fn new(config: CrmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(120));
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            session: RwLock::new(None),
        })
    }

    fn api_version(&self) -> &str {
        self.config
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_API_VERSION)
    }

    async fn login(&self) -> Result<AccessToken> {
        let url = format!(
            "{}/services/oauth2/token",
            self.config.login_url.trim_end_matches('/')
        );
        let password = format!(
            "{}{}",
            self.config.password,
            self.config.security_token.as_deref().unwrap_or("")
        );
        let params = [
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("username", self.config.username.as_str()),
            ("password", password.as_str()),
        ];

        tracing::debug!("Logging in to CRM as {}", self.config.username);
        let response = self.client.post(&url).form(&params).send().await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        let session = AccessToken {
            token: token.access_token,
            instance_url: token.instance_url.trim_end_matches('/').to_string(),
        };
        *self.session.write().await = Some(session.clone());
        tracing::info!("CRM session established at {}", session.instance_url);
        Ok(session)
    }

    async fn session(&self) -> Result<AccessToken> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        self.login().await
    }

    /// Sends a request built by `build`, logging in again and retrying once
    /// when the session is reported as expired.
    async fn send_with_session<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&AccessToken) -> RequestBuilder,
    {
        let session = self.session().await?;
        match check_status(build(&session).bearer_auth(&session.token).send().await?).await {
            Err(OpsError::SessionExpired) => {
                tracing::warn!("CRM session expired, logging in again");
                let session = self.login().await?;
                check_status(build(&session).bearer_auth(&session.token).send().await?).await
            }
            other => other,
        }
    }

    fn data_url(&self, session: &AccessToken, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            session.instance_url,
            self.api_version(),
            path.trim_start_matches('/')
        )
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || body.contains("INVALID_SESSION_ID") {
        return Err(OpsError::SessionExpired);
    }

    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            let first = v.as_array().and_then(|a| a.first()).cloned().unwrap_or(v);
            first
                .get("message")
                .or_else(|| first.get("error_description"))
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        })
        .unwrap_or(body);

    Err(OpsError::Crm {
        status: status.as_u16(),
        message,
    })
}

fn to_record(mut fields: Map<String, Value>) -> Record {
    fields.remove("attributes");
    Record {
        data: fields.into_iter().collect(),
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn query_all(&self, soql: &str) -> Result<Vec<Record>> {
        tracing::debug!("CRM query: {}", soql);
        let response = self
            .send_with_session(|s| {
                self.client
                    .get(self.data_url(s, "query"))
                    .query(&[("q", soql)])
            })
            .await?;
        let mut page: QueryPage = response.json().await?;
        let mut records: Vec<Record> = page.records.drain(..).map(to_record).collect();

        while let Some(next) = page.next_records_url.take() {
            let response = self
                .send_with_session(|s| {
                    self.client
                        .request(Method::GET, format!("{}{}", s.instance_url, next))
                })
                .await?;
            page = response.json().await?;
            records.extend(page.records.drain(..).map(to_record));
        }

        tracing::debug!("CRM query returned {} records", records.len());
        Ok(records)
    }

    async fn update(&self, object: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let body = Value::Object(fields);
        self.send_with_session(|s| {
            self.client
                .patch(self.data_url(s, &format!("sobjects/{}/{}", object, id)))
                .json(&body)
        })
        .await?;
        tracing::debug!("Updated {} {}", object, id);
        Ok(())
    }

    async fn describe_fields(&self, object: &str) -> Result<Vec<String>> {
        let response = self
            .send_with_session(|s| {
                self.client
                    .get(self.data_url(s, &format!("sobjects/{}/describe", object)))
            })
            .await?;
        let describe: ObjectDescribe = response.json().await?;
        let mut fields: Vec<String> = describe.fields.into_iter().map(|f| f.name).collect();
        fields.sort();
        if fields.is_empty() {
            return Err(OpsError::processing(format!(
                "Could not identify fields of object: {}",
                object
            )));
        }
        Ok(fields)
    }

    async fn object_reference(&self) -> Result<BTreeMap<String, String>> {
        let response = self
            .send_with_session(|s| self.client.get(self.data_url(s, "sobjects")))
            .await?;
        let describe: GlobalDescribe = response.json().await?;
        Ok(describe
            .sobjects
            .into_iter()
            .map(|o| (o.name, o.label))
            .collect())
    }

    async fn export_report(&self, report_id: &str) -> Result<Table> {
        let response = self
            .send_with_session(|s| {
                self.client
                    .get(format!("{}/{}", s.instance_url, report_id))
                    .query(&[("export", "1"), ("enc", "UTF-8"), ("xf", "csv")])
                    .header(reqwest::header::COOKIE, format!("sid={}", s.token))
            })
            .await?;
        let body = response.text().await?;
        parse_report_csv(&body)
    }
}

/// Parses an exported report. The export ends with a footer block separated
/// by a blank line, which is dropped.
pub fn parse_report_csv(body: &str) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut table = Table::new(headers.clone());

    for row in reader.records() {
        let row = row?;
        if row.len() != headers.len() || row.iter().all(|c| c.is_empty()) {
            break;
        }
        let mut record = Record::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            record.data.insert(header.clone(), value);
        }
        table.rows.push(record);
    }
    Ok(table)
}
