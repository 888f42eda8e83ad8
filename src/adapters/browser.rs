//! WebDriver session used to drive the CRM's web forms.

use crate::config::toml_config::{BrowserConfig, CrmConfig};
use crate::pages::locators;
use crate::utils::error::{OpsError, Result};
use fantoccini::cookies::Cookie;
use fantoccini::elements::Element;
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::{Client, ClientBuilder, Locator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const ENTER: &str = "\u{E007}";

const DOWNLOAD_MIME_TYPES: &str = "application/csv,text/csv,application/vnd.ms-excel,\
application/x-msexcel,application/excel,application/x-excel,text/comma-separated-values";

/// Element locator with owned selector text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum By {
    Id(String),
    Css(String),
    XPath(String),
    LinkText(String),
}

impl By {
    pub fn id(s: impl Into<String>) -> Self {
        By::Id(s.into())
    }

    pub fn css(s: impl Into<String>) -> Self {
        By::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        By::XPath(s.into())
    }

    pub fn link_text(s: impl Into<String>) -> Self {
        By::LinkText(s.into())
    }

    pub fn name(s: &str) -> Self {
        By::Css(format!("[name='{}']", s))
    }

    fn locator(&self) -> Locator<'_> {
        match self {
            By::Id(s) => Locator::Id(s),
            By::Css(s) => Locator::Css(s),
            By::XPath(s) => Locator::XPath(s),
            By::LinkText(s) => Locator::LinkText(s),
        }
    }
}

impl fmt::Display for By {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            By::Id(s) => write!(f, "#{}", s),
            By::Css(s) => write!(f, "css {}", s),
            By::XPath(s) => write!(f, "xpath {}", s),
            By::LinkText(s) => write!(f, "link '{}'", s),
        }
    }
}

/// Maps WebDriver failures onto the error kinds the batch runner tells apart.
pub fn classify(err: CmdError, by: &By) -> OpsError {
    let what = by.to_string();
    match &err {
        CmdError::WaitTimeout => OpsError::Timeout { what },
        CmdError::Standard(wd) if wd.error == ErrorStatus::StaleElementReference => {
            OpsError::StaleElement { what }
        }
        CmdError::Standard(wd) if wd.error == ErrorStatus::NoSuchElement => {
            OpsError::ElementNotFound { what }
        }
        CmdError::Standard(wd) if wd.error == ErrorStatus::Timeout => OpsError::Timeout { what },
        _ => OpsError::Browser(err),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedCookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    secure: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

/// Sites that serve the CRM's own pages (classic, Lightning, Visualforce).
const CRM_SITES: [&str; 3] = ["salesforce.com", "force.com", "visualforce.com"];

/// True when `current` is served from the same site as `instance`
/// (same registrable domain, i.e. the last two host labels). Any two CRM
/// sites count as the same site.
pub fn belongs_to_crm(current: &str, instance: &str) -> bool {
    fn site(url: &str) -> Option<String> {
        let host = Url::parse(url).ok()?.host_str()?.to_string();
        let labels: Vec<&str> = host.split('.').collect();
        let start = labels.len().saturating_sub(2);
        Some(labels[start..].join("."))
    }
    match (site(current), site(instance)) {
        (Some(a), Some(b)) => {
            a == b || (CRM_SITES.contains(&a.as_str()) && CRM_SITES.contains(&b.as_str()))
        }
        _ => false,
    }
}

pub struct BrowserSession {
    client: Client,
    config: BrowserConfig,
    instance_url: String,
    element_timeout: Duration,
}

impl BrowserSession {
    pub async fn launch(config: &BrowserConfig, instance_url: &str) -> Result<Self> {
        let mut prefs = serde_json::Map::new();
        prefs.insert("browser.download.folderList".into(), json!(2));
        prefs.insert("browser.download.manager.showWhenStarting".into(), json!(false));
        prefs.insert(
            "browser.helperApps.neverAsk.saveToDisk".into(),
            json!(DOWNLOAD_MIME_TYPES),
        );
        if let Some(dir) = &config.download_dir {
            let dir = std::path::absolute(dir).unwrap_or_else(|_| PathBuf::from(dir));
            prefs.insert("browser.download.dir".into(), json!(dir.to_string_lossy()));
        }

        let mut args = Vec::new();
        if config.headless.unwrap_or(false) {
            args.push("-headless");
        }

        let mut caps = serde_json::Map::new();
        caps.insert(
            "moz:firefoxOptions".to_string(),
            json!({ "prefs": prefs, "args": args }),
        );

        tracing::info!("Starting browser session via {}", config.webdriver_url);
        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&config.webdriver_url)
            .await?;

        Ok(Self {
            client,
            config: config.clone(),
            instance_url: instance_url.trim_end_matches('/').to_string(),
            element_timeout: Duration::from_secs(config.element_timeout_secs.unwrap_or(10)),
        })
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn element_timeout(&self) -> Duration {
        self.element_timeout
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        tracing::debug!("Navigating to {}", url);
        self.client.goto(url).await?;
        Ok(())
    }

    /// Navigates to a path under the CRM instance, e.g. `/apex/Page?x=1`.
    pub async fn goto_path(&self, path: &str) -> Result<()> {
        let url = format!("{}/{}", self.instance_url, path.trim_start_matches('/'));
        self.goto(&url).await
    }

    pub async fn title(&self) -> Result<String> {
        Ok(self.client.title().await?)
    }

    /// Opens the CRM, reusing saved cookies when present and falling back to
    /// the standard login form. Waits for the home page, which gives the user
    /// time to complete a second-factor prompt.
    pub async fn open_crm(&self, credentials: &LoginCredentials) -> Result<()> {
        self.goto(&self.instance_url).await?;

        if self.load_cookies().await? {
            self.goto(&self.instance_url).await?;
        }

        if !self.find_all(&By::name("username")).await?.is_empty() {
            tracing::info!("Signing in to the CRM as {}", credentials.username);
            self.fill(&By::name("username"), &credentials.username).await?;
            self.fill(&By::name("pw"), &format!("{}{}", credentials.password, ENTER))
                .await?;
        }

        self.wait_home().await?;

        let current = self.client.current_url().await?;
        if !belongs_to_crm(current.as_str(), &self.instance_url) {
            return Err(OpsError::processing(format!(
                "Login landed outside the CRM: {}",
                current
            )));
        }

        self.save_cookies().await?;
        tracing::info!("CRM home page loaded");
        Ok(())
    }

    /// Waits for the signed-in home marker, leaving time for a second-factor
    /// prompt.
    pub async fn wait_home(&self) -> Result<()> {
        let login_timeout = Duration::from_secs(self.config.login_timeout_secs.unwrap_or(60));
        self.wait_for_within(&locators::home::marker(), login_timeout)
            .await?;
        Ok(())
    }

    /// Signs in through the single-sign-on portal and launches the CRM tile.
    pub async fn sso_login(&self, credentials: &LoginCredentials) -> Result<()> {
        let sso_url = self
            .config
            .sso_url
            .as_deref()
            .ok_or_else(|| OpsError::MissingConfigError {
                field: "browser.sso_url".to_string(),
            })?;
        self.goto(sso_url).await?;
        self.wait_title_contains("Sign In", Duration::from_secs(100))
            .await?;
        self.fill(&By::id("okta-signin-username"), &credentials.username)
            .await?;
        self.fill(&By::id("okta-signin-password"), &credentials.password)
            .await?;
        self.click(&By::id("okta-signin-submit")).await?;
        self.wait_title_contains("My Applications", Duration::from_secs(100))
            .await?;

        if let Some(app_url) = self.config.sso_app_url.as_deref() {
            self.goto(app_url).await?;
        }
        self.wait_home().await
    }

    fn cookies_path(&self) -> Option<PathBuf> {
        self.config.cookies_path.as_ref().map(PathBuf::from)
    }

    async fn load_cookies(&self) -> Result<bool> {
        let Some(path) = self.cookies_path().filter(|p| p.exists()) else {
            return Ok(false);
        };
        let saved: Vec<SavedCookie> = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
        for c in saved {
            let mut cookie = Cookie::new(c.name, c.value);
            if let Some(domain) = c.domain {
                cookie.set_domain(domain);
            }
            if let Some(path) = c.path {
                cookie.set_path(path);
            }
            if let Some(secure) = c.secure {
                cookie.set_secure(secure);
            }
            if let Err(e) = self.client.add_cookie(cookie).await {
                tracing::debug!("Skipping saved cookie: {}", e);
            }
        }
        tracing::debug!("Loaded cookies from {}", path.display());
        Ok(true)
    }

    async fn save_cookies(&self) -> Result<()> {
        let Some(path) = self.cookies_path() else {
            return Ok(());
        };
        let saved: Vec<SavedCookie> = self
            .client
            .get_all_cookies()
            .await?
            .iter()
            .map(|c| SavedCookie {
                name: c.name().to_string(),
                value: c.value().to_string(),
                domain: c.domain().map(|d| d.to_string()),
                path: c.path().map(|p| p.to_string()),
                secure: c.secure(),
            })
            .collect();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(&saved)?).await?;
        Ok(())
    }

    pub async fn find(&self, by: &By) -> Result<Element> {
        self.client
            .find(by.locator())
            .await
            .map_err(|e| classify(e, by))
    }

    pub async fn find_all(&self, by: &By) -> Result<Vec<Element>> {
        self.client
            .find_all(by.locator())
            .await
            .map_err(|e| classify(e, by))
    }

    pub async fn wait_for(&self, by: &By) -> Result<Element> {
        self.wait_for_within(by, self.element_timeout).await
    }

    pub async fn wait_for_within(&self, by: &By, timeout: Duration) -> Result<Element> {
        self.client
            .wait()
            .at_most(timeout)
            .every(POLL_INTERVAL)
            .for_element(by.locator())
            .await
            .map_err(|e| classify(e, by))
    }

    /// Waits until the element is present, displayed and enabled.
    pub async fn wait_clickable(&self, by: &By) -> Result<Element> {
        self.wait_clickable_within(by, self.element_timeout).await
    }

    pub async fn wait_clickable_within(&self, by: &By, timeout: Duration) -> Result<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = self.client.find(by.locator()).await {
                let displayed = element.is_displayed().await.unwrap_or(false);
                let enabled = element.is_enabled().await.unwrap_or(false);
                if displayed && enabled {
                    return Ok(element);
                }
            }
            if Instant::now() >= deadline {
                return Err(OpsError::Timeout {
                    what: by.to_string(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until the element is displayed.
    pub async fn wait_visible_within(&self, by: &By, timeout: Duration) -> Result<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = self.client.find(by.locator()).await {
                if element.is_displayed().await.unwrap_or(false) {
                    return Ok(element);
                }
            }
            if Instant::now() >= deadline {
                return Err(OpsError::Timeout {
                    what: by.to_string(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until no matching element is displayed.
    pub async fn wait_invisible_within(&self, by: &By, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let elements = self.client.find_all(by.locator()).await.unwrap_or_default();
            let mut visible = false;
            for element in &elements {
                if element.is_displayed().await.unwrap_or(false) {
                    visible = true;
                    break;
                }
            }
            if !visible {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OpsError::Timeout {
                    what: format!("{} to disappear", by),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_title_contains(&self, fragment: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.title().await.unwrap_or_default().contains(fragment) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OpsError::Timeout {
                    what: format!("page title '{}'", fragment),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits for a modal overlay to appear and then to go away.
    pub async fn modal_wait(&self, by: &By, timeout: Duration) -> Result<()> {
        self.wait_for_within(by, timeout).await?;
        self.wait_invisible_within(by, timeout + Duration::from_secs(30))
            .await?;
        sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    pub async fn click(&self, by: &By) -> Result<()> {
        let element = self.find(by).await?;
        element.click().await.map_err(|e| classify(e, by))
    }

    pub async fn fill(&self, by: &By, text: &str) -> Result<()> {
        let element = self.find(by).await?;
        element.send_keys(text).await.map_err(|e| classify(e, by))
    }

    /// Picks the `<option>` of a `<select>` by its visible text.
    pub async fn select_by_text(&self, by: &By, text: &str) -> Result<()> {
        let element = self.find(by).await?;
        element
            .select_by_label(text)
            .await
            .map_err(|e| classify(e, by))
    }

    /// Types an absolute file path into a file input.
    pub async fn attach_file(&self, by: &By, path: &Path) -> Result<()> {
        let absolute = std::path::absolute(path)?;
        self.fill(by, &absolute.to_string_lossy()).await
    }

    /// Accepts a pending alert if one shows up within `timeout`.
    pub async fn dismiss_alert(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.client.accept_alert().await.is_ok() {
                sleep(Duration::from_secs(2)).await;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Returns to the CRM home page, accepting any "leave page" alert.
    pub async fn return_home(&self) -> Result<()> {
        self.goto(&self.instance_url).await?;
        self.dismiss_alert(Duration::from_secs(3)).await?;
        Ok(())
    }

    pub async fn quit(self) -> Result<()> {
        self.client.close().await?;
        tracing::debug!("Browser session closed");
        Ok(())
    }
}

impl LoginCredentials {
    /// SSO credentials when an SSO portal is configured, otherwise the CRM
    /// user's own.
    pub fn for_browser(browser: &BrowserConfig, crm: &CrmConfig) -> Self {
        match (&browser.sso_url, &browser.sso_username, &browser.sso_password) {
            (Some(_), Some(username), Some(password)) => Self {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Self {
                username: crm.username.clone(),
                password: crm.password.clone(),
            },
        }
    }
}

/// A signed-in CRM browser that can be torn down and rebuilt between batch
/// items.
pub struct CrmBrowser {
    config: BrowserConfig,
    instance_url: String,
    credentials: LoginCredentials,
    session: Option<BrowserSession>,
}

impl CrmBrowser {
    pub async fn start(
        config: &BrowserConfig,
        instance_url: &str,
        credentials: LoginCredentials,
    ) -> Result<Self> {
        let mut browser = Self {
            config: config.clone(),
            instance_url: instance_url.to_string(),
            credentials,
            session: None,
        };
        browser.session = Some(browser.open().await?);
        Ok(browser)
    }

    async fn open(&self) -> Result<BrowserSession> {
        let session = BrowserSession::launch(&self.config, &self.instance_url).await?;
        let signed_in = if self.config.sso_url.is_some() {
            session.sso_login(&self.credentials).await
        } else {
            session.open_crm(&self.credentials).await
        };
        if let Err(e) = signed_in {
            if let Err(quit) = session.quit().await {
                tracing::debug!("Closing failed session: {}", quit);
            }
            return Err(e);
        }
        Ok(session)
    }

    pub fn session(&self) -> Result<&BrowserSession> {
        self.session
            .as_ref()
            .ok_or_else(|| OpsError::processing("Browser session is not running"))
    }

    pub async fn return_home(&self) -> Result<()> {
        self.session()?.return_home().await
    }

    pub async fn restart(&mut self) -> Result<()> {
        if let Some(old) = self.session.take() {
            if let Err(e) = old.quit().await {
                tracing::debug!("Old browser session did not close cleanly: {}", e);
            }
        }
        self.session = Some(self.open().await?);
        tracing::info!("Browser session restarted");
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.quit().await,
            None => Ok(()),
        }
    }
}
