use crate::config::{TransportConfig, SCRIPT_PERMISSIONS};
use crate::Error;
use std::io;
use tracing::{debug, info};

/// Remote filesystem primitives the transport is built on.
#[trait_variant::make(RemoteFs: Send)]
pub trait LocalRemoteFs {
    /// Permission bits of `path`. `NotFound` when it does not exist.
    async fn stat(&self, path: &str) -> io::Result<u32>;
    async fn mkdir(&self, path: &str) -> io::Result<()>;
    /// Creates or truncates `path` and writes `contents`.
    async fn write(&self, path: &str, contents: &[u8]) -> io::Result<()>;
    async fn read(&self, path: &str) -> io::Result<Vec<u8>>;
    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()>;
    async fn remove(&self, path: &str) -> io::Result<()>;
}

/// Knows where scripts and results live and how to push, read and delete them.
#[derive(Debug, Clone, Default)]
pub struct FileTransport {
    config: TransportConfig,
}

impl FileTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn base_path(&self) -> &str {
        &self.config.base_path
    }

    /// `<base>/<name>`, or `name` alone when the base is empty.
    pub fn in_base(&self, name: &str) -> String {
        let base = self.config.base_path.trim_end_matches('/');
        if base.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", base, name)
        }
    }

    /// Creates the base directory unless it is already there.
    pub async fn ensure_base_dir<F: RemoteFs + Sync>(&self, fs: &F) -> crate::Result<()> {
        let base = self.config.base_path.trim_end_matches('/');
        if base.is_empty() {
            return Ok(());
        }
        match fs.stat(base).await {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::from_remote_io(base, e)),
        }
        match fs.mkdir(base).await {
            Ok(()) => {
                info!(path = base, "created remote base directory");
                Ok(())
            }
            // SFTP reports an existing directory as a generic failure
            Err(e) => match fs.stat(base).await {
                Ok(_) => {
                    debug!(path = base, error = %e, "base directory appeared concurrently");
                    Ok(())
                }
                Err(_) => Err(Error::FileTransferError(format!(
                    "Failed to create directory {}: {}",
                    base, e
                ))),
            },
        }
    }

    /// Writes `content` to `path` (or the configured script path) with
    /// executable permissions and returns the path written.
    pub async fn push_file<F: RemoteFs + Sync>(
        &self,
        fs: &F,
        content: &str,
        path: Option<&str>,
    ) -> crate::Result<String> {
        let path = self.resolve(path, self.config.script_path.as_deref(), "writing")?;
        self.ensure_base_dir(fs).await?;

        fs.write(&path, content.as_bytes()).await.map_err(|e| {
            Error::FileTransferError(format!("Failed to write to remote file {}: {}", path, e))
        })?;
        fs.chmod(&path, SCRIPT_PERMISSIONS).await.map_err(|e| {
            Error::FileTransferError(format!("Failed to set permissions on {}: {}", path, e))
        })?;

        debug!(path = %path, bytes = content.len(), "pushed remote file");
        Ok(path)
    }

    pub async fn read_file<F: RemoteFs + Sync>(
        &self,
        fs: &F,
        path: Option<&str>,
    ) -> crate::Result<String> {
        let path = self.resolve(path, self.config.result_path.as_deref(), "reading")?;
        let bytes = fs
            .read(&path)
            .await
            .map_err(|e| Error::from_remote_io(&path, e))?;
        debug!(path = %path, bytes = bytes.len(), "read remote file");
        String::from_utf8(bytes)
            .map_err(|e| Error::FileTransferError(format!("{} is not valid UTF-8: {}", path, e)))
    }

    /// Missing files come back as [`Error::FileNotFoundError`].
    pub async fn delete_file<F: RemoteFs + Sync>(&self, fs: &F, path: &str) -> crate::Result<()> {
        if path.is_empty() {
            return Err(Error::ConfigError("No file path specified for deleting".to_string()));
        }
        fs.remove(path)
            .await
            .map_err(|e| Error::from_remote_io(path, e))?;
        debug!(path, "deleted remote file");
        Ok(())
    }

    fn resolve(
        &self,
        explicit: Option<&str>,
        configured: Option<&str>,
        action: &str,
    ) -> crate::Result<String> {
        explicit
            .or(configured)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::ConfigError(format!("No file path specified for {}", action)))
    }
}
