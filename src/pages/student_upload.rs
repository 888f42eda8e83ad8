use crate::adapters::browser::BrowserSession;
use crate::pages::locators::student_upload as loc;
use crate::utils::error::Result;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

const STEP_PAUSE: Duration = Duration::from_secs(2);

/// The school-setup bulk loader for student records.
pub struct StudentUploadPage<'a> {
    browser: &'a BrowserSession,
}

impl<'a> StudentUploadPage<'a> {
    pub fn new(browser: &'a BrowserSession) -> Self {
        Self { browser }
    }

    pub async fn open(&self, setup_id: &str) -> Result<()> {
        self.browser
            .goto_path(&loc::loader_path(setup_id))
            .await?;
        sleep(STEP_PAUSE).await;
        Ok(())
    }

    pub async fn load_file(&self, csv: &Path) -> Result<()> {
        self.browser.attach_file(&loc::file_input(), csv).await?;
        self.browser.click(&loc::load_file()).await?;
        sleep(STEP_PAUSE).await;
        Ok(())
    }

    pub async fn insert(&self) -> Result<()> {
        self.browser.wait_clickable(&loc::start_batch()).await?.click().await?;
        sleep(STEP_PAUSE).await;
        Ok(())
    }

    /// Publishes staged records from the school setup page.
    pub async fn publish(&self, setup_id: &str) -> Result<()> {
        self.browser
            .goto_path(&loc::publish_path(setup_id))
            .await?;
        self.browser.wait_clickable(&loc::publish()).await?.click().await?;
        sleep(Duration::from_secs(3)).await;
        Ok(())
    }
}
