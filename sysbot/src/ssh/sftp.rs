use crate::transport::RemoteFs;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// SFTP subsystem of a session, opened on first use and shared afterwards.
#[derive(Clone)]
pub struct SftpFs {
    sftp: Arc<SftpSession>,
}

impl SftpFs {
    pub(crate) async fn open(handle: &russh::client::Handle<super::Handler>) -> crate::Result<Self> {
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await.map_err(|e| {
            crate::Error::FileTransferError(format!("Failed to create SFTP session: {}", e))
        })?;
        Ok(Self {
            sftp: Arc::new(sftp),
        })
    }

    pub(crate) async fn close(&self) -> crate::Result<()> {
        self.sftp.close().await.map_err(|e| {
            crate::Error::FileTransferError(format!("Failed to close SFTP session: {}", e))
        })
    }
}

fn to_io(err: SftpError) -> io::Error {
    let kind = match &err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => io::ErrorKind::NotFound,
            StatusCode::PermissionDenied => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        },
        SftpError::Timeout => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.to_string())
}

impl RemoteFs for SftpFs {
    async fn stat(&self, path: &str) -> io::Result<u32> {
        let attrs = self.sftp.metadata(path).await.map_err(to_io)?;
        Ok(attrs.permissions.unwrap_or(0))
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        self.sftp.create_dir(path).await.map_err(to_io)
    }

    async fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        let mut file = self.sftp.create(path).await.map_err(to_io)?;
        file.write_all(contents).await?;
        file.shutdown().await
    }

    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut file = self.sftp.open(path).await.map_err(to_io)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        // only the permission bits go out; everything else stays as is
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..FileAttributes::empty()
        };
        self.sftp.set_metadata(path, attrs).await.map_err(to_io)
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        self.sftp.remove_file(path).await.map_err(to_io)
    }
}
