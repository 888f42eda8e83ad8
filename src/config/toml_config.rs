use crate::utils::error::{OpsError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub school_year: SchoolYearConfig,
    pub crm: CrmConfig,
    pub browser: Option<BrowserConfig>,
    pub paths: PathsConfig,
    pub batch: Option<BatchConfig>,
    pub smtp: Option<SmtpConfig>,
    pub sftp: Option<HashMap<String, SftpConfig>>,
    pub workflows: Option<WorkflowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolYearConfig {
    /// Label used in file names, e.g. `SY20`.
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    pub login_url: String,
    pub instance_url: String,
    pub api_version: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub security_token: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: Option<bool>,
    pub download_dir: Option<String>,
    pub cookies_path: Option<String>,
    pub login_timeout_secs: Option<u64>,
    pub element_timeout_secs: Option<u64>,
    pub sso_url: Option<String>,
    pub sso_app_url: Option<String>,
    pub sso_username: Option<String>,
    pub sso_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub templates_dir: String,
    pub log_dir: String,
    pub temp_dir: String,
    /// Workbook listing every school with its informal name, ids and grade level.
    pub school_reference: String,
    /// Root of the shared drive holding each school team's folders.
    pub shared_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_consecutive_failures: Option<usize>,
    pub max_total_failures: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    /// Appended to `username` when it carries no `@`.
    pub domain_suffix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub staff_deployment: Option<String>,
    pub accepted_errors: Option<String>,
    pub datashare_dictionary: Option<String>,
    pub datashare_dir: Option<String>,
    pub partner_export_dir: Option<String>,
    pub partner_read_dir: Option<String>,
    /// Assessments for tutoring IAs must be taken before this date (YYYY-MM-DD).
    pub assessment_cutoff: Option<String>,
    /// Schools whose IA form lists students one grade above their record.
    pub grade_offset_schools: Option<Vec<String>>,
    pub external_id_prefix: Option<String>,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(OpsError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| OpsError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are
    /// left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| OpsError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("school_year.label", &self.school_year.label)?;
        validation::validate_url("crm.login_url", &self.crm.login_url)?;
        validation::validate_url("crm.instance_url", &self.crm.instance_url)?;
        validation::validate_non_empty_string("crm.username", &self.crm.username)?;
        validation::validate_non_empty_string("crm.client_id", &self.crm.client_id)?;

        if let Some(browser) = &self.browser {
            validation::validate_url("browser.webdriver_url", &browser.webdriver_url)?;
        }

        for (field, path) in [
            ("paths.input_dir", &self.paths.input_dir),
            ("paths.output_dir", &self.paths.output_dir),
            ("paths.templates_dir", &self.paths.templates_dir),
            ("paths.log_dir", &self.paths.log_dir),
            ("paths.temp_dir", &self.paths.temp_dir),
            ("paths.school_reference", &self.paths.school_reference),
            ("paths.shared_root", &self.paths.shared_root),
        ] {
            validation::validate_path(field, path)?;
        }

        if let Some(batch) = &self.batch {
            if let Some(n) = batch.max_consecutive_failures {
                validation::validate_positive_number("batch.max_consecutive_failures", n, 1)?;
            }
            if let Some(n) = batch.max_total_failures {
                validation::validate_positive_number("batch.max_total_failures", n, 1)?;
            }
        }

        if let Some(cutoff) = self.workflows().assessment_cutoff.as_deref() {
            chrono::NaiveDate::parse_from_str(cutoff, "%Y-%m-%d").map_err(|e| {
                OpsError::InvalidConfigValueError {
                    field: "workflows.assessment_cutoff".to_string(),
                    value: cutoff.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }

        Ok(())
    }

    pub fn year(&self) -> &str {
        &self.school_year.label
    }

    pub fn browser(&self) -> Result<&BrowserConfig> {
        self.browser.as_ref().ok_or_else(|| OpsError::MissingConfigError {
            field: "browser".to_string(),
        })
    }

    pub fn smtp(&self) -> Result<&SmtpConfig> {
        self.smtp.as_ref().ok_or_else(|| OpsError::MissingConfigError {
            field: "smtp".to_string(),
        })
    }

    pub fn sftp(&self, name: &str) -> Result<&SftpConfig> {
        self.sftp
            .as_ref()
            .and_then(|hosts| hosts.get(name))
            .ok_or_else(|| OpsError::MissingConfigError {
                field: format!("sftp.{}", name),
            })
    }

    pub fn workflows(&self) -> WorkflowConfig {
        self.workflows.clone().unwrap_or_default()
    }

    pub fn workflow_path(&self, field: &str, value: Option<String>) -> Result<PathBuf> {
        value
            .map(PathBuf::from)
            .ok_or_else(|| OpsError::MissingConfigError {
                field: format!("workflows.{}", field),
            })
    }

    pub fn max_consecutive_failures(&self) -> usize {
        self.batch
            .as_ref()
            .and_then(|b| b.max_consecutive_failures)
            .unwrap_or(3)
    }

    pub fn max_total_failures(&self) -> Option<usize> {
        self.batch.as_ref().and_then(|b| b.max_total_failures)
    }

    pub fn input_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.paths.input_dir).join(file_name)
    }

    pub fn template_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.paths.templates_dir).join(file_name)
    }

    pub fn log_file(&self, workflow: &str) -> PathBuf {
        Path::new(&self.paths.log_dir).join(format!("{}.log", workflow))
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[school_year]
label = "SY20"

[crm]
login_url = "https://login.example.com"
instance_url = "https://na82.example.com"
client_id = "client"
client_secret = "secret"
username = "ops@example.org"
password = "pw"
security_token = "tok"

[paths]
input_dir = "./input_files"
output_dir = "./output"
templates_dir = "./templates"
log_dir = "./log"
temp_dir = "./temp"
school_reference = "./input_files/school_reference.xlsx"
shared_root = "./shared"
"#;

    #[test]
    fn test_parse_basic_config() {
        let config = AppConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.year(), "SY20");
        assert_eq!(config.crm.instance_url, "https://na82.example.com");
        assert_eq!(config.max_consecutive_failures(), 3);
        assert_eq!(config.max_total_failures(), None);
        assert!(config.validate().is_ok());
        assert!(config.browser().is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SCHOOLHOUSE_TEST_CRM_PASSWORD", "from-env");
        let content = BASIC.replace("password = \"pw\"", "password = \"${SCHOOLHOUSE_TEST_CRM_PASSWORD}\"");

        let config = AppConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.crm.password, "from-env");

        std::env::remove_var("SCHOOLHOUSE_TEST_CRM_PASSWORD");
    }

    #[test]
    fn test_unknown_env_var_is_left_in_place() {
        let content = BASIC.replace("password = \"pw\"", "password = \"${SCHOOLHOUSE_TEST_UNSET_VAR}\"");
        let config = AppConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.crm.password, "${SCHOOLHOUSE_TEST_UNSET_VAR}");
    }

    #[test]
    fn test_config_validation_rejects_bad_url() {
        let content = BASIC.replace("https://na82.example.com", "not-a-url");
        let config = AppConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_zero_threshold() {
        let content = format!("{}\n[batch]\nmax_consecutive_failures = 0\n", BASIC);
        let config = AppConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file_with_sftp_hosts() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let content = format!(
            "{}\n[sftp.partner]\nhost = \"sftp.example.org\"\nusername = \"u\"\npassword = \"p\"\n",
            BASIC
        );
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.sftp("partner").unwrap().host, "sftp.example.org");
        assert!(config.sftp("district").is_err());
    }
}
