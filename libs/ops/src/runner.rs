use crate::error::{Error, Result};
use crate::log::OperationLog;

use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use orbit_cluster::server::ProvisionedServer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed retry cadence for remote commands.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: usize = 10;

/// Executes a command on a remote server, returning its stdout.
#[allow(async_fn_in_trait)]
pub trait ServerRunner {
    async fn run(&self, server: &ProvisionedServer, argv: &[String]) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug)]
pub struct Command {
    pub argv: Vec<String>,
    /// Human-readable description recorded into the operation log.
    pub description: String,
    pub retry: bool,
}

impl Command {
    pub fn new(argv: Vec<String>, description: &str) -> Self {
        Command {
            argv,
            description: description.to_string(),
            retry: false,
        }
    }

    pub fn with_retry(argv: Vec<String>, description: &str) -> Self {
        Command {
            retry: true,
            ..Command::new(argv, description)
        }
    }
}

/// Run `command` on `server`, retrying transient failures on a fixed
/// interval for a bounded number of attempts. Every failed attempt leaves a
/// warning in the operation log keyed by the server address; exhaustion or
/// a non-retryable failure leaves an error entry and surfaces.
pub async fn run_command<R: ServerRunner>(
    runner: &R,
    log: &OperationLog,
    cancel: &CancellationToken,
    server: &ProvisionedServer,
    command: &Command,
) -> Result<Vec<u8>> {
    let addr = server.advertise_ip.as_str();
    let mut backoff = ConstantBuilder::default()
        .with_delay(RETRY_INTERVAL)
        .with_max_times(RETRY_ATTEMPTS)
        .build();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match runner.run(server, &command.argv).await {
            Ok(stdout) => {
                debug!(msg = "command succeeded", addr, command = command.description);
                log.info(Some(addr), format!("{}: completed", command.description));
                return Ok(stdout);
            }
            Err(error) if command.retry && error.is_retryable() => match backoff.next() {
                Some(delay) => {
                    warn!(msg = "command failed, retrying", addr, %error);
                    log.warn(
                        Some(addr),
                        format!("{} failed: {error}, retrying", command.description),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                }
                None => {
                    log.error(
                        Some(addr),
                        format!("{} gave up: {error:?}", command.description),
                    );
                    return Err(error);
                }
            },
            Err(error) => {
                let stdout = match &error {
                    Error::CommandFailed { stdout, .. } => stdout.clone(),
                    _ => String::new(),
                };
                log.error(
                    Some(addr),
                    format!(
                        "{} failed: {error:?}, output: {stdout:?}",
                        command.description
                    ),
                );
                return Err(error);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceStatus {
    Active,
    Activating,
    Failed,
}

/// Poll a service until it settles: keep waiting while it is activating,
/// abort as soon as it reports failed.
pub async fn wait_for_service<F, Fut>(
    name: &str,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ServiceStatus>>,
{
    let mut backoff = ConstantBuilder::default()
        .with_delay(RETRY_INTERVAL)
        .with_max_times(RETRY_ATTEMPTS)
        .build();
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match poll().await? {
            ServiceStatus::Active => return Ok(()),
            ServiceStatus::Failed => return Err(Error::ServiceFailed(name.to_string())),
            ServiceStatus::Activating => match backoff.next() {
                Some(delay) => {
                    debug!(msg = "service still activating", service = name);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                }
                None => return Err(Error::ConnectionProblem(format!(
                    "service {name} did not become active"
                ))),
            },
        }
    }
}
