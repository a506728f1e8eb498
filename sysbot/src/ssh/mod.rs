mod channel;
mod sftp;

pub use channel::SshChannel;
pub use sftp::SftpFs;

use crate::collector::Collector;
use crate::config::{CollectorConfig, SysbotConfig, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::connector::{Connector, ExecutionRequest, ExecutionResult};
use crate::executor::{CommandExecutor, ExecutionBackend};
use crate::shell::{Elevation, Invocation, Shell};
use crate::transport::FileTransport;
use crate::{Credentials, Target};

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PrivateKeyWithHashAlg;
use russh_keys::load_secret_key;
use russh_keys::ssh_key::public::PublicKey;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An SSH host the connection is tunnelled through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpHost {
    pub target: Target,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// Budget for TCP connect, key exchange and authentication together,
    /// jump hosts included.
    pub handshake_timeout: Duration,
    pub inactivity_timeout: Option<Duration>,
    /// Private keys tried in order when no password is given.
    pub key_paths: Vec<PathBuf>,
    /// Each hop is reached through a direct-tcpip channel of the previous one.
    pub jump_hosts: Vec<JumpHost>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            inactivity_timeout: None,
            key_paths: default_key_paths(),
            jump_hosts: Vec::new(),
        }
    }
}

fn default_key_paths() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) else {
        return Vec::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

pub struct Handler;

#[async_trait]
impl client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

type Hop = (Target, client::Handle<Handler>);

/// An authenticated SSH connection.
pub struct SshSession {
    handle: client::Handle<Handler>,
    /// Jump host connections, first hop first.
    hops: Vec<Hop>,
    target: Target,
    user: String,
    password: Option<String>,
    sftp: Option<SftpFs>,
}

impl SshSession {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    async fn sftp(&mut self) -> crate::Result<SftpFs> {
        if let Some(sftp) = &self.sftp {
            return Ok(sftp.clone());
        }
        let sftp = SftpFs::open(&self.handle).await?;
        debug!(target = %self.target, "opened sftp subsystem");
        self.sftp = Some(sftp.clone());
        Ok(sftp)
    }
}

impl ExecutionBackend for SshSession {
    type Channel = SshChannel;
    type Fs = SftpFs;

    async fn open_channel(&mut self, invocation: &Invocation) -> crate::Result<SshChannel> {
        let channel = self.handle.channel_open_session().await?;
        channel.exec(true, invocation.command.as_str()).await?;
        if let Some(stdin) = &invocation.stdin {
            channel.data(&stdin[..]).await?;
        }
        channel.eof().await?;
        Ok(SshChannel::new(channel))
    }

    async fn remote_fs(&mut self) -> crate::Result<SftpFs> {
        self.sftp().await
    }

    fn elevation(&self) -> Option<Elevation> {
        self.password.clone().map(|password| Elevation {
            login: self.user.clone(),
            password,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SshConnector {
    config: SshConfig,
    executor: CommandExecutor,
}

impl SshConnector {
    pub fn new(
        config: SshConfig,
        shell: Shell,
        collector: CollectorConfig,
        transport: FileTransport,
    ) -> Self {
        Self {
            config,
            executor: CommandExecutor::new(shell, Collector::new(collector), transport),
        }
    }

    /// Defaults for a Linux host.
    pub fn bash() -> Self {
        Self::new(
            SshConfig::default(),
            Shell::Bash,
            CollectorConfig::default(),
            FileTransport::default(),
        )
    }

    /// Defaults for a Windows host running OpenSSH.
    pub fn powershell() -> Self {
        Self::new(
            SshConfig::default(),
            Shell::Powershell,
            CollectorConfig::default(),
            FileTransport::default(),
        )
    }

    pub fn from_config(config: &SysbotConfig, shell: Shell) -> crate::Result<Self> {
        Ok(Self::new(
            config.ssh()?,
            shell,
            config.collector()?,
            FileTransport::new(config.transport()),
        ))
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn shell(&self) -> Shell {
        self.executor.shell()
    }

    pub fn transport(&self) -> &FileTransport {
        self.executor.transport()
    }

    /// Writes `content` with mode 0755 and returns the path written.
    pub async fn push_file(
        &self,
        session: &mut SshSession,
        content: &str,
        path: Option<&str>,
    ) -> crate::Result<String> {
        let fs = session.sftp().await?;
        self.transport().push_file(&fs, content, path).await
    }

    pub async fn read_file(
        &self,
        session: &mut SshSession,
        path: Option<&str>,
    ) -> crate::Result<String> {
        let fs = session.sftp().await?;
        self.transport().read_file(&fs, path).await
    }

    pub async fn delete_file(&self, session: &mut SshSession, path: &str) -> crate::Result<()> {
        let fs = session.sftp().await?;
        self.transport().delete_file(&fs, path).await
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: self.config.inactivity_timeout,
            ..Default::default()
        })
    }

    /// Connects to `target` directly, or through `via` when a hop is given.
    async fn dial(
        &self,
        via: Option<&Hop>,
        target: &Target,
    ) -> crate::Result<client::Handle<Handler>> {
        let Some((hop, handle)) = via else {
            let addr = (target.host(), target.port());
            return Ok(client::connect(self.client_config(), addr, Handler).await?);
        };
        let channel = handle
            .channel_open_direct_tcpip(target.host(), u32::from(target.port()), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                crate::Error::ConnectionError(format!(
                    "jump host {} could not reach {}: {}",
                    hop, target, e
                ))
            })?;
        debug!(%hop, %target, "tunnel opened");
        Ok(client::connect_stream(self.client_config(), channel.into_stream(), Handler).await?)
    }

    /// Walks the jump hosts and authenticates on the target. Every hop that
    /// came up is left in `hops`, so the caller can close it on failure.
    async fn connect(
        &self,
        target: &Target,
        credentials: &Credentials,
        hops: &mut Vec<Hop>,
    ) -> crate::Result<(client::Handle<Handler>, String)> {
        let user = credentials.resolve_login()?;
        let hop_users = self
            .config
            .jump_hosts
            .iter()
            .map(|hop| hop.credentials.resolve_login())
            .collect::<crate::Result<Vec<_>>>()?;

        for (hop, hop_user) in self.config.jump_hosts.iter().zip(hop_users) {
            let mut handle = self.dial(hops.last(), &hop.target).await?;
            self.authenticate(&mut handle, &hop.target, &hop_user, &hop.credentials)
                .await?;
            debug!(hop = %hop.target, user = %hop_user, "jump host ready");
            hops.push((hop.target.clone(), handle));
        }

        let mut handle = self.dial(hops.last(), target).await?;
        self.authenticate(&mut handle, target, &user, credentials).await?;
        Ok((handle, user))
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<Handler>,
        target: &Target,
        user: &str,
        credentials: &Credentials,
    ) -> crate::Result<()> {
        if let Some(password) = credentials.password() {
            if !handle.authenticate_password(user, password).await? {
                return Err(crate::Error::AuthenticationError(format!(
                    "password rejected for {}@{}",
                    user, target
                )));
            }
            debug!(%target, %user, "authenticated with password");
        } else if !self.authenticate_keys(handle, user).await? {
            if !handle.authenticate_none(user).await? {
                return Err(crate::Error::AuthenticationError(format!(
                    "no key or password accepted for {}@{}",
                    user, target
                )));
            }
            debug!(%target, %user, "authenticated with none");
        }
        Ok(())
    }

    async fn authenticate_keys(
        &self,
        handle: &mut client::Handle<Handler>,
        user: &str,
    ) -> crate::Result<bool> {
        for path in &self.config.key_paths {
            let key = match load_secret_key(path, None) {
                Ok(key) => key,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping key");
                    continue;
                }
            };
            let key = PrivateKeyWithHashAlg::new(Arc::new(key), None)?;
            if handle.authenticate_publickey(user, key).await? {
                debug!(%user, path = %path.display(), "authenticated with key");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    async fn open_session(
        &self,
        target: &Target,
        credentials: &Credentials,
    ) -> crate::Result<SshSession> {
        let mut hops = Vec::new();
        let connected = tokio::time::timeout(
            self.config.handshake_timeout,
            self.connect(target, credentials, &mut hops),
        )
        .await
        .unwrap_or_else(|_| {
            Err(crate::Error::TimeoutError(format!(
                "SSH handshake with {} took longer than {:?}",
                target, self.config.handshake_timeout
            )))
        });
        let (handle, user) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                disconnect_hops(&hops).await;
                return Err(e);
            }
        };
        info!(%target, %user, hops = hops.len(), "ssh session opened");
        Ok(SshSession {
            handle,
            hops,
            target: target.clone(),
            user,
            password: credentials.password().map(str::to_string),
            sftp: None,
        })
    }

    async fn execute_command(
        &self,
        session: &mut SshSession,
        request: &ExecutionRequest,
    ) -> crate::Result<ExecutionResult> {
        self.executor.execute(session, request).await
    }

    async fn close_session(&self, session: SshSession) {
        if let Some(sftp) = &session.sftp {
            if let Err(e) = sftp.close().await {
                debug!(target = %session.target, error = %e, "sftp close failed");
            }
        }
        match session
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
        {
            Ok(()) => info!(target = %session.target, "ssh session closed"),
            Err(e) => warn!(target = %session.target, error = %e, "failed to close ssh session"),
        }
        disconnect_hops(&session.hops).await;
    }
}

/// Closes jump host connections, last hop first.
async fn disconnect_hops(hops: &[Hop]) {
    for (target, handle) in hops.iter().rev() {
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
        {
            warn!(hop = %target, error = %e, "failed to close jump host connection");
        }
    }
}
