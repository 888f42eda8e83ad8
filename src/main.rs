use chrono::{Local, NaiveDate};
use clap::Parser;
use schoolhouse_ops::adapters::{CrmBrowser, CrmClient, LoginCredentials, SftpTransfer, SmtpMailer};
use schoolhouse_ops::app::workflows::{
    datashare, ia_assignment, partner_export, section_creation, student_upload, tot_audit, trackers,
};
use schoolhouse_ops::config::cli::{
    self, AuditCommand, Cli, Command, CrmCommand, IaCommand, PlanKind, SectionsCommand,
    StudentsCommand, TrackerArgs, TrackersCommand,
};
use schoolhouse_ops::config::AppConfig;
use schoolhouse_ops::core::batch::{interrupt_channel, BatchRunner, InterruptSignal, RetryPolicy};
use schoolhouse_ops::core::queries;
use schoolhouse_ops::domain::model::Table;
use schoolhouse_ops::utils::error::{OpsError, Result};
use schoolhouse_ops::utils::{logger, validation::Validate};
use schoolhouse_ops::CrmApi;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(cli.verbose, cli.log_json, None);
            eprintln!("❌ Failed to load config file '{}': {}", cli.config.display(), e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    let log_file = config.log_file(workflow_name(&cli.command));
    logger::init_cli_logger(cli.verbose, cli.log_json, Some(&log_file));
    tracing::info!("🚀 Starting schoolhouse-ops ({})", config.year());

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let (handle, interrupt) = interrupt_channel();
    handle.on_ctrl_c();

    if let Err(e) = run(&cli, &config, &interrupt).await {
        tracing::error!(
            "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
            workflow_name(&cli.command),
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        let exit_code = e.exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

fn workflow_name(command: &Command) -> &'static str {
    match command {
        Command::Sections { .. } => "sections",
        Command::Ia { .. } => "indicator-areas",
        Command::Students { .. } => "students",
        Command::Audit { .. } => "tot-audit",
        Command::Trackers { .. } => "trackers",
        Command::Datashare => "datashare",
        Command::PartnerExport => "partner-export",
        Command::Crm { .. } => "crm",
    }
}

async fn run(cli: &Cli, config: &AppConfig, interrupt: &InterruptSignal) -> Result<()> {
    match &cli.command {
        Command::Sections { action } => run_sections(cli, config, action, interrupt).await,
        Command::Ia { action } => run_ia(config, action, interrupt).await,
        Command::Students { action } => run_students(config, action, interrupt).await,
        Command::Audit { action } => run_audit(config, action).await,
        Command::Trackers { action } => run_trackers(cli, config, action).await,
        Command::Datashare => {
            let crm = crm_client(config)?;
            let wf = config.workflows();
            let transfer = SftpTransfer::new(config.sftp("datashare")?.clone());
            let sent = datashare::run(
                &crm,
                &transfer,
                &config.workflow_path("datashare_dictionary", wf.datashare_dictionary)?,
                Path::new(&config.paths.school_reference),
                &config.workflow_path("datashare_dir", wf.datashare_dir)?,
                today(),
            )
            .await?;
            println!("✅ Sent {} files", sent.len());
            Ok(())
        }
        Command::PartnerExport => {
            let wf = config.workflows();
            let read_dir = wf.partner_read_dir.ok_or_else(|| OpsError::MissingConfigError {
                field: "workflows.partner_read_dir".to_string(),
            })?;
            let write_root = config.workflow_path("partner_export_dir", wf.partner_export_dir)?;
            let transfer = SftpTransfer::new(config.sftp("partner")?.clone());
            let received =
                partner_export::export_partner_files(&transfer, &read_dir, &write_root, today())
                    .await?;
            println!("✅ Received {} files", received.len());
            Ok(())
        }
        Command::Crm { action } => run_crm(config, action).await,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Builds the REST client, asking for the password when the config leaves
/// it empty.
fn crm_client(config: &AppConfig) -> Result<CrmClient> {
    let mut crm = config.crm.clone();
    if crm.password.is_empty() {
        crm.password = cli::prompt_password(&format!("CRM password for {}", crm.username))?;
    }
    CrmClient::new(crm)
}

async fn start_browser(config: &AppConfig) -> Result<CrmBrowser> {
    let browser = config.browser()?;
    let credentials = LoginCredentials::for_browser(browser, &config.crm);
    CrmBrowser::start(browser, &config.crm.instance_url, credentials).await
}

fn runner(name: &str, config: &AppConfig) -> BatchRunner {
    BatchRunner::new(name, RetryPolicy::from(config))
}

fn confirm_overwrite(path: &Path, assume_yes: bool) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    cli::confirm(&format!("{} exists. Overwrite it?", path.display()), assume_yes)
}

async fn run_sections(
    cli: &Cli,
    config: &AppConfig,
    action: &SectionsCommand,
    interrupt: &InterruptSignal,
) -> Result<()> {
    let crm = crm_client(config)?;
    match action {
        SectionsCommand::Plan {
            kind,
            schedule,
            program,
            roles,
            schools,
            output,
        } => {
            let schedule =
                section_creation::Schedule::new(&schedule.setting, &schedule.start, &schedule.end)?;
            let worklist = match kind {
                PlanKind::Academic => {
                    let deployment = config
                        .workflow_path("staff_deployment", config.workflows().staff_deployment)?;
                    section_creation::academic_sections_to_create(&crm, &deployment, &schedule)
                        .await?
                }
                PlanKind::NonAcademic => {
                    section_creation::non_academic_sections_to_create(&crm, &schedule).await?
                }
                PlanKind::Inventory => {
                    section_creation::inventory_sections_to_create(
                        &crm,
                        Path::new(&config.paths.school_reference),
                        &schedule,
                    )
                    .await?
                }
                PlanKind::Roles => {
                    let program = program.as_deref().ok_or_else(|| {
                        OpsError::validation("--program is required for role plans")
                    })?;
                    let schools = (!schools.is_empty()).then_some(schools.as_slice());
                    section_creation::sections_for_roles(&crm, program, roles, schools, &schedule)
                        .await?
                }
            };
            let path = output
                .clone()
                .unwrap_or_else(|| config.input_path(section_creation::INPUT_FILE));
            if !confirm_overwrite(&path, cli.yes)? {
                return Ok(());
            }
            section_creation::write_worklist(&path, &worklist)?;
            println!("✅ {} sections planned in {}", worklist.len(), path.display());
            Ok(())
        }
        SectionsCommand::Create { input } => {
            let path = input
                .clone()
                .unwrap_or_else(|| config.input_path(section_creation::INPUT_FILE));
            let sections = section_creation::read_worklist(&path)?;
            let mut browser = start_browser(config).await?;
            let report = section_creation::create_all(
                &crm,
                &mut browser,
                &sections,
                &runner("Section creation", config),
                interrupt,
            )
            .await;
            browser.close().await?;
            println!("✅ {}", report.into_result()?);
            Ok(())
        }
        SectionsCommand::Deactivate { program } => {
            let count = section_creation::deactivate_sections(&crm, program, |n| {
                cli::confirm(&format!("Deactivate {} {} sections?", n, program), cli.yes)
            })
            .await?;
            println!("✅ Deactivated {} sections", count);
            Ok(())
        }
    }
}

fn roster_path(config: &AppConfig) -> PathBuf {
    Path::new(&config.paths.output_dir).join(ia_assignment::ROSTER_FILE)
}

async fn run_ia(config: &AppConfig, action: &IaCommand, interrupt: &InterruptSignal) -> Result<()> {
    let wf = config.workflows();
    match action {
        IaCommand::Roster { cutoff, output } => {
            let crm = crm_client(config)?;
            let cutoff = match cutoff.clone().or(wf.assessment_cutoff) {
                Some(text) => Some(NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| {
                    OpsError::validation(format!("Cutoff '{}' is not YYYY-MM-DD: {}", text, e))
                })?),
                None => ia_assignment::default_cutoff(config.year()),
            };
            let path = output.clone().unwrap_or_else(|| roster_path(config));
            let roster = ia_assignment::indicator_areas_to_assign(&crm, cutoff, today(), &path).await?;
            println!("✅ {} indicator areas to assign in {}", roster.len(), path.display());
            Ok(())
        }
        IaCommand::Enroll { input } => {
            let path = input.clone().unwrap_or_else(|| roster_path(config));
            let students = ia_assignment::read_roster(&path)?;
            let mut browser = start_browser(config).await?;
            let report = ia_assignment::enroll_all(
                &mut browser,
                &students,
                wf.grade_offset_schools.unwrap_or_default(),
                &runner("Indicator area enrollment", config),
                interrupt,
            )
            .await;
            browser.close().await?;
            println!("✅ {}", report?.into_result()?);
            Ok(())
        }
    }
}

async fn run_students(
    config: &AppConfig,
    action: &StudentsCommand,
    interrupt: &InterruptSignal,
) -> Result<()> {
    let crm = crm_client(config)?;
    match action {
        StudentsCommand::Upload {
            input,
            enrollment_date,
        } => {
            let settings = student_upload::UploadSettings {
                input: input
                    .clone()
                    .unwrap_or_else(|| config.input_path(student_upload::INPUT_FILE)),
                enrollment_date: enrollment_date.clone(),
                school_reference: PathBuf::from(&config.paths.school_reference),
                temp_dir: PathBuf::from(&config.paths.temp_dir),
                year: config.year().to_string(),
            };
            let mailer = SmtpMailer::new(config.smtp()?.clone());
            let uploads = student_upload::prepare_uploads(&crm, &settings).await?;
            if uploads.is_empty() {
                println!("✅ Every student is already in the CRM");
                return Ok(());
            }
            let mut browser = start_browser(config).await?;
            let report = student_upload::upload_staged(
                &crm,
                &mut browser,
                &mailer,
                &uploads,
                &runner("Student upload", config),
                interrupt,
            )
            .await;
            browser.close().await?;
            println!("✅ {}", report?.into_result()?);
            Ok(())
        }
        StudentsCommand::FixIds { prefix } => {
            let prefix = prefix
                .clone()
                .or(config.workflows().external_id_prefix)
                .ok_or_else(|| OpsError::MissingConfigError {
                    field: "workflows.external_id_prefix".to_string(),
                })?;
            let updated = student_upload::update_external_ids(&crm, &prefix).await?;
            println!("✅ Updated {} students", updated);
            Ok(())
        }
    }
}

async fn run_audit(config: &AppConfig, action: &AuditCommand) -> Result<()> {
    let crm = crm_client(config)?;
    match action {
        AuditCommand::FixLabels => {
            let fixed = tot_audit::fix_tier_labels(&crm).await?;
            println!("✅ Fixed {} tier labels", fixed);
        }
        AuditCommand::Report => {
            let accepted = config.workflows().accepted_errors.map(PathBuf::from);
            let errors = tot_audit::audit(&crm, accepted.as_deref()).await?;
            let reference = queries::school_reference(Path::new(&config.paths.school_reference))?;
            let written = tot_audit::write_school_reports(
                &errors,
                &reference,
                Path::new(&config.paths.shared_root),
                config.year(),
            )?;
            println!("✅ {} errors across {} school reports", errors.len(), written.len());
        }
    }
    Ok(())
}

fn tracker_set(
    config: &AppConfig,
    kind: trackers::TrackerKind,
    test: bool,
    school: Option<&str>,
) -> Result<trackers::TrackerSet> {
    let reference = queries::school_reference(Path::new(&config.paths.school_reference))?;
    let root = if test {
        Path::new(&config.paths.output_dir).join("tracker-test")
    } else {
        PathBuf::from(&config.paths.shared_root)
    };
    let mut set = trackers::TrackerSet {
        kind,
        year: config.year().to_string(),
        root,
        templates_dir: PathBuf::from(&config.paths.templates_dir),
        teams: trackers::school_teams(&reference),
        create_folders: test,
    };
    if let Some(name) = school {
        set.teams = vec![set.team(name)?.clone()];
    }
    Ok(set)
}

async fn run_trackers(cli: &Cli, config: &AppConfig, action: &TrackersCommand) -> Result<()> {
    let crm = crm_client(config)?;
    let written = match action {
        TrackersCommand::Deploy(TrackerArgs { kind, test, school }) => {
            let set = tracker_set(config, kind.parse()?, *test, school.as_deref())?;
            trackers::deploy_all(&crm, &set, |prompt| cli::confirm(prompt, cli.yes)).await?
        }
        TrackersCommand::Refresh(TrackerArgs { kind, test, school }) => {
            let set = tracker_set(config, kind.parse()?, *test, school.as_deref())?;
            trackers::update_validation_sheets(&crm, &set).await?
        }
        TrackersCommand::Service { test, school } => {
            let set = tracker_set(
                config,
                trackers::TrackerKind::WeeklyService,
                *test,
                school.as_deref(),
            )?;
            trackers::deploy_all(&crm, &set, |prompt| cli::confirm(prompt, cli.yes)).await?
        }
    };
    println!("✅ {} trackers written", written.len());
    Ok(())
}

async fn run_crm(config: &AppConfig, action: &CrmCommand) -> Result<()> {
    let crm = crm_client(config)?;
    match action {
        CrmCommand::Objects => {
            for (name, label) in crm.object_reference().await? {
                println!("{}\t{}", name, label);
            }
        }
        CrmCommand::Fields { object } => {
            for field in crm.describe_fields(object).await? {
                println!("{}", field);
            }
        }
        CrmCommand::Query { soql } => {
            let mut table = Table::default();
            for record in crm.query_all(soql).await? {
                table.push(record);
            }
            let csv = table.to_csv_bytes()?;
            println!("{}", String::from_utf8_lossy(&csv));
        }
    }
    Ok(())
}
