use crate::{Credentials, Target};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// What to run and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub command: String,
    /// Treat `command` as a script body to stage on the remote side.
    pub script: bool,
    /// Run under an elevated identity (sudo, RunAs).
    pub runas: bool,
    /// After a script run, read its result file into [`ExecutionResult::result`].
    pub fetch_result: bool,
    /// Staging path for this run, overriding the transport's.
    pub script_path: Option<String>,
}

impl ExecutionRequest {
    pub fn inline<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            script: false,
            runas: false,
            fetch_result: false,
            script_path: None,
        }
    }

    pub fn script<S: Into<String>>(body: S) -> Self {
        Self {
            script: true,
            ..Self::inline(body)
        }
    }

    pub fn runas(mut self) -> Self {
        self.runas = true;
        self
    }

    pub fn fetch_result(mut self) -> Self {
        self.fetch_result = true;
        self
    }

    pub fn script_path<S: Into<String>>(mut self, path: S) -> Self {
        self.script_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Console output (stdout).
    pub output: String,
    /// Console errors (stderr).
    pub error: String,
    /// `None` when the channel closed without reporting one or collection timed out.
    pub exit_status: Option<u32>,
    pub timed_out: bool,
    /// Where the script was staged; left in place for the caller to delete.
    pub script_path: Option<String>,
    pub result_path: Option<String>,
    /// Contents of the result file, when requested.
    pub result: Option<String>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0) && !self.timed_out
    }

    /// The standardized connector response: `StatusCode`, `Result`, `Error`, `Metadata`.
    pub fn into_response(self) -> Response {
        let status_code = match (self.exit_status, self.timed_out) {
            (Some(code), false) => code as i64,
            _ => -1,
        };
        let error = if !self.error.is_empty() {
            Some(self.error)
        } else if self.timed_out {
            Some("output collection timed out".to_string())
        } else {
            None
        };
        let mut metadata = json!({ "timed_out": self.timed_out });
        if let Some(path) = self.script_path {
            metadata["script_path"] = Value::String(path);
        }
        if let Some(path) = self.result_path {
            metadata["result_path"] = Value::String(path);
        }
        Response {
            status_code,
            result: Value::String(self.result.unwrap_or(self.output)),
            error,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub status_code: i64,
    pub result: Value,
    pub error: Option<String>,
    pub metadata: Value,
}

/// A protocol connector that runs commands over sessions it opens and closes.
///
/// Connectors hold configuration only. Every session returned by
/// `open_session` must be handed back to `close_session` exactly once; no
/// operation here closes a session on its own.
#[trait_variant::make(Connector: Send)]
pub trait LocalConnector {
    type Session: Send;

    async fn open_session(
        &self,
        target: &Target,
        credentials: &Credentials,
    ) -> crate::Result<Self::Session>;

    /// A non-zero remote exit status is reported in the result, not as an error.
    async fn execute_command(
        &self,
        session: &mut Self::Session,
        request: &ExecutionRequest,
    ) -> crate::Result<ExecutionResult>;

    /// Best effort: failures are logged, never returned.
    async fn close_session(&self, session: Self::Session);
}

/// Opens a session, runs `f` on it and closes it whatever `f` returned.
pub async fn with_session<C, T, F>(
    connector: &C,
    target: &Target,
    credentials: &Credentials,
    f: F,
) -> crate::Result<T>
where
    C: Connector + Sync,
    F: for<'s> FnOnce(&'s C, &'s mut C::Session) -> BoxFuture<'s, crate::Result<T>>,
{
    let mut session = connector.open_session(target, credentials).await?;
    let outcome = f(connector, &mut session).await;
    if let Err(e) = &outcome {
        warn!(%target, error = %e, "closing session after failed operation");
    }
    connector.close_session(session).await;
    outcome
}
