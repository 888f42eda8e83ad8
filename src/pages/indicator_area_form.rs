use crate::adapters::browser::BrowserSession;
use crate::pages::locators::indicator_area as loc;
use crate::utils::error::{OpsError, Result};
use std::time::Duration;
use tokio::time::sleep;

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(100);
const ROW_VISIBLE_TIMEOUT: Duration = Duration::from_millis(1500);

/// The indicator-area assignment form.
pub struct IndicatorAreaForm<'a> {
    browser: &'a BrowserSession,
}

impl<'a> IndicatorAreaForm<'a> {
    pub fn new(browser: &'a BrowserSession) -> Self {
        Self { browser }
    }

    pub async fn open(&self) -> Result<()> {
        self.browser.goto_path(loc::PATH).await?;
        self.wait_loaded().await
    }

    pub async fn wait_loaded(&self) -> Result<()> {
        self.browser
            .wait_for_within(&loc::page_title(), PAGE_LOAD_TIMEOUT)
            .await?;
        Ok(())
    }

    pub async fn select_school(&self, school: &str) -> Result<()> {
        self.browser.wait_clickable(&loc::school()).await?;
        self.browser.select_by_text(&loc::school(), school).await?;
        sleep(Duration::from_millis(750)).await;
        Ok(())
    }

    pub async fn select_grade(&self, grade: &str) -> Result<()> {
        self.browser.wait_clickable(&loc::grade()).await?;
        self.browser.select_by_text(&loc::grade(), grade).await?;
        sleep(Duration::from_millis(750)).await;
        Ok(())
    }

    pub async fn first_page(&self) -> Result<()> {
        if let Some(link) = self
            .browser
            .find_all(&loc::first_page())
            .await?
            .into_iter()
            .next()
        {
            link.click().await?;
            sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    /// Selects the student's row, paging forward until it shows up, and
    /// opens the assignment modal.
    pub async fn select_student(&self, student_id: &str) -> Result<()> {
        self.browser.wait_for(&loc::students_table()).await?;
        let row = loc::student_row(student_id);

        loop {
            match self
                .browser
                .wait_visible_within(&row, ROW_VISIBLE_TIMEOUT)
                .await
            {
                Ok(cell) => {
                    cell.click().await?;
                    break;
                }
                Err(OpsError::Timeout { .. }) => {
                    let next = self.browser.find_all(&loc::next_page()).await?;
                    let Some(next) = next.into_iter().next() else {
                        return Err(OpsError::ElementNotFound {
                            what: format!("student {} in the roster", student_id),
                        });
                    };
                    next.click().await?;
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            }
        }

        sleep(Duration::from_millis(500)).await;
        self.browser
            .wait_clickable(&loc::add_to_ia())
            .await?
            .click()
            .await?;
        Ok(())
    }

    pub async fn assign(&self, area: &str) -> Result<()> {
        let checkbox = loc::area(area).ok_or_else(|| {
            OpsError::validation(format!("Unknown indicator area '{}'", area))
        })?;
        self.browser.wait_clickable(&checkbox).await?.click().await?;
        sleep(Duration::from_millis(250)).await;
        self.browser.click(&loc::add_area()).await?;
        self.browser
            .modal_wait(&loc::modal(), self.browser.element_timeout())
            .await
    }

    pub async fn save(&self) -> Result<()> {
        self.browser.wait_clickable(&loc::save()).await?.click().await?;
        self.browser
            .wait_visible_within(&loc::success(), self.browser.element_timeout())
            .await?;
        Ok(())
    }
}
