use crate::collector::{Clock, Collector, OutputChannel, TokioClock};
use crate::connector::{ExecutionRequest, ExecutionResult};
use crate::shell::{Elevation, Invocation, Shell};
use crate::transport::{FileTransport, RemoteFs};
use crate::{Error, Phase};
use rand::Rng;
use tracing::{debug, info, warn};

/// What the executor needs from a live session.
#[trait_variant::make(ExecutionBackend: Send)]
pub trait LocalExecutionBackend {
    type Channel: OutputChannel;
    type Fs: RemoteFs + Sync;

    /// Starts `invocation` on a fresh channel and writes its stdin, if any.
    async fn open_channel(&mut self, invocation: &Invocation) -> crate::Result<Self::Channel>;

    async fn remote_fs(&mut self) -> crate::Result<Self::Fs>;

    /// Login and password for elevation, when the session knows a password.
    fn elevation(&self) -> Option<Elevation>;
}

/// Runs requests inline or as staged scripts on top of a session.
#[derive(Debug, Clone)]
pub struct CommandExecutor<K = TokioClock> {
    shell: Shell,
    collector: Collector<K>,
    transport: FileTransport,
}

impl CommandExecutor<TokioClock> {
    pub fn new(shell: Shell, collector: Collector<TokioClock>, transport: FileTransport) -> Self {
        Self {
            shell,
            collector,
            transport,
        }
    }
}

impl<K: Clock> CommandExecutor<K> {
    pub fn with_collector(shell: Shell, collector: Collector<K>, transport: FileTransport) -> Self {
        Self {
            shell,
            collector,
            transport,
        }
    }

    pub fn shell(&self) -> Shell {
        self.shell
    }

    pub fn transport(&self) -> &FileTransport {
        &self.transport
    }

    pub async fn execute<B: ExecutionBackend>(
        &self,
        backend: &mut B,
        request: &ExecutionRequest,
    ) -> crate::Result<ExecutionResult> {
        let elevation = if request.runas {
            backend.elevation()
        } else {
            None
        };

        if !request.script {
            let invocation = self
                .shell
                .inline(&request.command, request.runas, elevation.as_ref());
            return self.run(backend, &invocation).await;
        }

        let (script_path, result_path) = self.staging_paths(request);
        let fs = backend
            .remote_fs()
            .await
            .map_err(|e| Error::execution(Phase::Staging, e))?;
        self.transport
            .push_file(&fs, &request.command, Some(&script_path))
            .await
            .map_err(|e| Error::execution(Phase::Staging, e))?;
        info!(path = %script_path, runas = request.runas, "staged script");

        let invocation =
            self.shell
                .script(&script_path, &result_path, request.runas, elevation.as_ref());
        let mut result = self.run(backend, &invocation).await?;

        if request.fetch_result {
            let content = self
                .transport
                .read_file(&fs, Some(&result_path))
                .await
                .map_err(|e| Error::execution(Phase::ResultFetch, e))?;
            result.result = Some(content);
        }
        result.script_path = Some(script_path);
        result.result_path = Some(result_path);
        Ok(result)
    }

    async fn run<B: ExecutionBackend>(
        &self,
        backend: &mut B,
        invocation: &Invocation,
    ) -> crate::Result<ExecutionResult> {
        debug!(command = %invocation.command, "invoking");
        let mut channel = backend
            .open_channel(invocation)
            .await
            .map_err(|e| Error::execution(Phase::Invocation, e))?;

        let collected = match self.collector.collect(&mut channel).await {
            Ok(collected) => collected,
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    warn!(error = %close_err, "failed to close channel");
                }
                return Err(Error::execution(Phase::Collection, e));
            }
        };
        let exit_status = channel.exit_status();
        let stderr = channel.take_stderr();
        if let Err(e) = channel.close().await {
            warn!(error = %e, "failed to close channel");
        }

        if collected.timed_out {
            warn!(
                timeout_ms = self.collector.config().timeout.as_millis() as u64,
                "output collection hit its deadline; the remote command may still be running"
            );
        }

        Ok(ExecutionResult {
            output: collected.text,
            error: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
            timed_out: collected.timed_out,
            ..ExecutionResult::default()
        })
    }

    fn staging_paths(&self, request: &ExecutionRequest) -> (String, String) {
        let config = self.transport.config();
        let run_id = run_id();
        let script = request
            .script_path
            .clone()
            .or_else(|| config.script_path.clone())
            .unwrap_or_else(|| {
                self.transport
                    .in_base(&format!("{}.{}", run_id, self.shell.script_extension()))
            });
        let result = config
            .result_path
            .clone()
            .unwrap_or_else(|| self.transport.in_base(&format!("{}.result", run_id)));
        (script, result)
    }
}

fn run_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}
