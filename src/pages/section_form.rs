use crate::adapters::browser::BrowserSession;
use crate::pages::locators::section_form as loc;
use crate::utils::error::Result;
use std::time::Duration;
use tokio::time::sleep;

/// The "add students to programs" form used to create a section.
pub struct SectionForm<'a> {
    browser: &'a BrowserSession,
}

impl<'a> SectionForm<'a> {
    pub fn new(browser: &'a BrowserSession) -> Self {
        Self { browser }
    }

    pub async fn open(&self) -> Result<()> {
        self.browser.goto_path(loc::PATH).await
    }

    pub async fn select_school(&self, school: &str) -> Result<()> {
        self.browser.wait_for(&loc::school()).await?;
        self.browser.select_by_text(&loc::school(), school).await?;
        sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    /// Picks the program and confirms. A missing Proceed button is logged
    /// and the form carries on, as some programs skip the confirmation.
    pub async fn select_program(&self, program: &str) -> Result<()> {
        self.browser.click(&loc::program(program)).await?;
        match self.browser.wait_for(&loc::proceed()).await {
            Ok(button) => button.click().await?,
            Err(e) => tracing::warn!("May have failed to choose program {}: {}", program, e),
        }
        sleep(Duration::from_millis(2500)).await;
        Ok(())
    }

    pub async fn select_staff(&self, staff_name: &str) -> Result<()> {
        self.browser
            .select_by_text(&loc::staff(), staff_name)
            .await
    }

    pub async fn set_dates(&self, start: &str, end: &str) -> Result<()> {
        self.browser.fill(&loc::start_date(), start).await?;
        self.browser.fill(&loc::end_date(), end).await
    }

    pub async fn select_setting(&self, setting: &str) -> Result<()> {
        self.browser
            .select_by_text(&loc::in_after_school(), setting)
            .await
    }

    /// Saves and waits for the new section's detail page.
    pub async fn save(&self) -> Result<()> {
        sleep(Duration::from_secs(1)).await;
        self.browser.click(&loc::save()).await?;
        self.browser.wait_for(&loc::saved_section()).await?;
        Ok(())
    }

    pub async fn set_nickname(&self, nickname: &str) -> Result<()> {
        self.browser.click(&loc::saved_section()).await?;
        sleep(Duration::from_secs(2)).await;
        self.browser.fill(&loc::nickname(), nickname).await?;
        self.browser.click(&loc::save_nickname()).await?;
        sleep(Duration::from_secs(2)).await;
        Ok(())
    }
}
