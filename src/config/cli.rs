use crate::utils::error::{OpsError, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Password};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "schoolhouse-ops")]
#[command(about = "Data operations for the schoolhouse CRM: sections, rosters, trackers and partner files")]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "schoolhouse.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan, create and deactivate sections
    Sections {
        #[command(subcommand)]
        action: SectionsCommand,
    },
    /// Indicator area roster and enrollment
    Ia {
        #[command(subcommand)]
        action: IaCommand,
    },
    /// Student uploads and external ids
    Students {
        #[command(subcommand)]
        action: StudentsCommand,
    },
    /// Time-on-task audit
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },
    /// School team trackers
    Trackers {
        #[command(subcommand)]
        action: TrackersCommand,
    },
    /// Build and send the partner data share
    Datashare,
    /// Download the partner's export files
    PartnerExport,
    /// Raw CRM access
    Crm {
        #[command(subcommand)]
        action: CrmCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanKind {
    Academic,
    NonAcademic,
    Inventory,
    Roles,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// In School, Extended Learning or Curriculum
    #[arg(long, default_value = "In School")]
    pub setting: String,

    /// First day of the section (MM/DD/YYYY)
    #[arg(long)]
    pub start: String,

    /// Last day of the section (MM/DD/YYYY)
    #[arg(long)]
    pub end: String,
}

#[derive(Debug, Subcommand)]
pub enum SectionsCommand {
    /// Write the worklist of sections that do not exist yet
    Plan {
        #[arg(value_enum)]
        kind: PlanKind,

        #[command(flatten)]
        schedule: ScheduleArgs,

        /// Program for `roles` plans
        #[arg(long)]
        program: Option<String>,

        /// Staff roles for `roles` plans
        #[arg(long, value_delimiter = ',', required_if_eq("kind", "roles"))]
        roles: Vec<String>,

        /// Limit `roles` plans to these schools
        #[arg(long, value_delimiter = ',')]
        schools: Vec<String>,

        /// Worklist path (defaults to the input directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Create every section in the worklist through the section form
    Create {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Deactivate every active section of a program
    Deactivate {
        #[arg(long)]
        program: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum IaCommand {
    /// Write the roster of indicator areas to assign
    Roster {
        /// Assessments must be taken before this date (YYYY-MM-DD)
        #[arg(long)]
        cutoff: Option<String>,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Assign indicator areas from a roster through the IA form
    Enroll {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum StudentsCommand {
    /// Upload new students per school through the student loader
    Upload {
        #[arg(long)]
        input: Option<PathBuf>,

        /// Enrollment date for every uploaded student (MM/DD/YYYY)
        #[arg(long)]
        enrollment_date: String,
    },
    /// Fill missing student external ids
    FixIds {
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum AuditCommand {
    /// Normalise tier labels in session comments
    FixLabels,
    /// Write each school team's time-on-task error report
    Report,
}

#[derive(Debug, Args)]
pub struct TrackerArgs {
    /// attendance, leadership, coaching-log or service
    pub kind: String,

    /// Write to a scratch folder instead of the shared drive
    #[arg(long)]
    pub test: bool,

    /// Only this school team (informal name)
    #[arg(long)]
    pub school: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TrackersCommand {
    /// Build trackers from the template for every team
    Deploy(TrackerArgs),
    /// Refresh the dropdown sheets of deployed trackers
    Refresh(TrackerArgs),
    /// Build the weekly service tracker
    Service {
        #[arg(long)]
        test: bool,

        #[arg(long)]
        school: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CrmCommand {
    /// List every object with its label
    Objects,
    /// List the fields of an object
    Fields { object: String },
    /// Run a query and print the result as CSV
    Query { soql: String },
}

/// Asks a yes/no question. `assume_yes` answers without prompting.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        tracing::debug!("Auto-confirmed: {}", prompt);
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| OpsError::processing(format!("Failed to read answer: {}", e)))
}

pub fn prompt_password(prompt: &str) -> Result<String> {
    Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| OpsError::processing(format!("Failed to read password: {}", e)))
}
