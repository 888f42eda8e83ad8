use crate::config::toml_config::SftpConfig;
use crate::domain::ports::FileTransfer;
use crate::utils::error::{OpsError, Result};
use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_PORT: u16 = 22;

/// Password-authenticated SFTP transfers. Every call opens its own
/// connection on a blocking thread.
#[derive(Debug, Clone)]
pub struct SftpTransfer {
    config: SftpConfig,
}

impl SftpTransfer {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }

    fn connect(config: &SftpConfig) -> Result<(Session, Sftp)> {
        let port = config.port.unwrap_or(DEFAULT_PORT);
        tracing::debug!("Connecting to sftp://{}@{}:{}", config.username, config.host, port);
        let tcp = TcpStream::connect((config.host.as_str(), port))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&config.username, &config.password)?;
        if !session.authenticated() {
            return Err(OpsError::ConfigError {
                message: format!("SFTP login refused for {}", config.username),
            });
        }
        let sftp = session.sftp()?;
        Ok((session, sftp))
    }
}

fn put_dir_blocking(config: &SftpConfig, local_dir: &Path, remote_dir: &str) -> Result<Vec<PathBuf>> {
    let (_session, sftp) = SftpTransfer::connect(config)?;
    let mut sent = Vec::new();

    let mut entries: Vec<PathBuf> = std::fs::read_dir(local_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OpsError::processing(format!("Bad file name: {}", path.display())))?;
        let remote = PathBuf::from(remote_dir).join(name);
        let mut source = File::open(&path)?;
        let mut target = sftp.create(&remote)?;
        io::copy(&mut source, &mut target)?;
        tracing::info!("Uploaded {} to {}", path.display(), remote.display());
        sent.push(remote);
    }
    Ok(sent)
}

fn get_dir_blocking(config: &SftpConfig, remote_dir: &str, local_dir: &Path) -> Result<Vec<PathBuf>> {
    let (_session, sftp) = SftpTransfer::connect(config)?;
    std::fs::create_dir_all(local_dir)?;
    let mut received = Vec::new();

    for (remote, stat) in sftp.readdir(Path::new(remote_dir))? {
        if stat.is_dir() {
            continue;
        }
        let Some(name) = remote.file_name() else {
            continue;
        };
        let local = local_dir.join(name);
        let mut source = sftp.open(&remote)?;
        let mut target = File::create(&local)?;
        io::copy(&mut source, &mut target)?;
        if let Some(mtime) = stat.mtime {
            target.set_modified(UNIX_EPOCH + Duration::from_secs(mtime))?;
        } else {
            target.set_modified(SystemTime::now())?;
        }
        tracing::info!("Downloaded {} to {}", remote.display(), local.display());
        received.push(local);
    }
    Ok(received)
}

#[async_trait]
impl FileTransfer for SftpTransfer {
    async fn put_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<Vec<PathBuf>> {
        let config = self.config.clone();
        let local_dir = local_dir.to_path_buf();
        let remote_dir = remote_dir.to_string();
        tokio::task::spawn_blocking(move || put_dir_blocking(&config, &local_dir, &remote_dir))
            .await
            .map_err(|e| OpsError::processing(format!("SFTP task failed: {}", e)))?
    }

    async fn get_dir(&self, remote_dir: &str, local_dir: &Path) -> Result<Vec<PathBuf>> {
        let config = self.config.clone();
        let local_dir = local_dir.to_path_buf();
        let remote_dir = remote_dir.to_string();
        tokio::task::spawn_blocking(move || get_dir_blocking(&config, &remote_dir, &local_dir))
            .await
            .map_err(|e| OpsError::processing(format!("SFTP task failed: {}", e)))?
    }
}
