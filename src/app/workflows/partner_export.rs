//! Pulls the partner's nightly export files into a dated local folder.

use crate::domain::ports::FileTransfer;
use crate::utils::error::Result;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub fn dated_dir(root: &Path, day: NaiveDate) -> PathBuf {
    root.join(day.format("%Y.%m.%d").to_string())
}

/// Downloads every file in `read_dir` on the partner host into
/// `<write_root>/YYYY.MM.DD`.
pub async fn export_partner_files(
    transfer: &dyn FileTransfer,
    read_dir: &str,
    write_root: &Path,
    today: NaiveDate,
) -> Result<Vec<PathBuf>> {
    let target = dated_dir(write_root, today);
    tokio::fs::create_dir_all(&target).await?;
    let received = transfer.get_dir(read_dir, &target).await?;
    if received.is_empty() {
        tracing::warn!("⚠️ No files found in {}", read_dir);
    } else {
        tracing::info!("📥 Received {} files into {}", received.len(), target.display());
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LocalTransfer;
    use tempfile::TempDir;

    #[tokio::test]
    async fn files_land_in_a_dated_folder() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let outbox = remote.path().join("outbox");
        std::fs::create_dir_all(&outbox).unwrap();
        std::fs::write(outbox.join("students.csv"), "id\n1\n").unwrap();
        std::fs::write(outbox.join("attendance.csv"), "id\n1\n").unwrap();

        let transfer = LocalTransfer {
            remote_root: remote.path().to_path_buf(),
        };
        let today = NaiveDate::from_ymd_opt(2019, 11, 4).unwrap();
        let received = export_partner_files(&transfer, "outbox", local.path(), today)
            .await
            .unwrap();

        let folder = local.path().join("2019.11.04");
        assert_eq!(
            received,
            vec![folder.join("attendance.csv"), folder.join("students.csv")]
        );
        assert_eq!(std::fs::read_to_string(folder.join("students.csv")).unwrap(), "id\n1\n");
    }

    #[tokio::test]
    async fn missing_remote_folder_is_an_error() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let transfer = LocalTransfer {
            remote_root: remote.path().to_path_buf(),
        };
        let today = NaiveDate::from_ymd_opt(2019, 11, 4).unwrap();
        let result = export_partner_files(&transfer, "missing", local.path(), today).await;
        assert!(result.is_err());
    }
}
