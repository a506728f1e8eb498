pub mod error;

pub mod collector;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod executor;
pub mod shell;
pub mod transport;

pub mod traits;
pub use traits::*;

/// Gate behind ssh feature
#[cfg(feature = "ssh")]
pub mod ssh;

#[cfg(test)]
mod testing;

pub use config::{default_port, JumpHostConfig, SysbotConfig};
pub use connector::{with_session, Connector, ExecutionRequest, ExecutionResult, Response};
pub use credentials::Credentials;
pub use error::*;
pub use shell::{Elevation, Shell};

#[cfg(feature = "ssh")]
pub use ssh::{JumpHost, SshConnector, SshSession};
