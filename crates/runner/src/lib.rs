//! Supervisor for the long-running processes of a service.
//!
//! Every process receives a clone of one [`CancellationToken`]. The first
//! process to fail, or SIGINT/SIGTERM, cancels the token; the runner then
//! waits for the remaining processes, runs closers under a timeout and
//! exits with status 1 if a process failed, 0 otherwise.
//!
//! ```no_run
//! use sentinel_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             while !ctx.is_cancelled() {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => {}
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => tracing::info!("tick"),
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async { Ok(()) })
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const DEFAULT_CLOSER_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedProcess =
    Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

type BoxedCloser = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

struct NamedProcess {
    name: String,
    process: BoxedProcess,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<BoxedCloser>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: DEFAULT_CLOSER_TIMEOUT,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Add a process; `name` appears in every log line about it
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Closers run once every process has stopped, whatever the reason.
    /// A failing closer does not prevent the others from running.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run to completion and exit the process
    pub async fn run(self) {
        match self.run_until_stopped().await {
            Some(err) => {
                error!("Application exiting with error: {:#}", err);
                std::process::exit(1);
            }
            None => {
                info!("Application exiting normally");
                std::process::exit(0);
            }
        }
    }

    /// Run until every process stopped and closers finished.
    ///
    /// # Returns
    /// The error of the first process that failed, if any
    pub async fn run_until_stopped(self) -> Option<anyhow::Error> {
        let token = self.cancellation_token;
        spawn_signal_handlers(token.clone());

        let mut join_set = JoinSet::new();
        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            info!(process = %name, "Starting process");
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    info!(process = %name, "Process stopped");
                }
                Ok((name, Err(err))) => {
                    error!(process = %name, "Process failed: {:#}", err);
                    if first_error.is_none() {
                        first_error = Some(err.context(format!("process {} failed", name)));
                    }
                    token.cancel();
                }
                Err(err) => {
                    error!("Process panicked: {}", err);
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("process panicked: {}", err));
                    }
                    token.cancel();
                }
            }
        }

        if !self.closers.is_empty() {
            info!("Running closers with timeout of {:?}", self.closer_timeout);
            if tokio::time::timeout(self.closer_timeout, run_closers(self.closers))
                .await
                .is_err()
            {
                error!("Closers timed out after {:?}", self.closer_timeout);
            }
        }

        first_error
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c_token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received SIGINT");
                    ctrl_c_token.cancel();
                }
                Err(err) => error!("Error setting up SIGINT handler: {}", err),
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("Error setting up SIGTERM handler: {}", err);
                return;
            }
        };

        tokio::select! {
            _ = token.cancelled() => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                token.cancel();
            }
        }
    });
}

async fn run_closers(closers: Vec<BoxedCloser>) {
    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    while let Some(result) = closer_set.join_next().await {
        match result {
            Ok(Ok(())) => debug!("Closer completed"),
            Ok(Err(err)) => error!("Closer error: {:#}", err),
            Err(err) => error!("Closer panicked: {}", err),
        }
    }
}
