//! Coordinated, deadline-bounded shutdown of telemetry pipelines.
//!
//! Each provider registers a named callback at startup. At shutdown every
//! callback is spawned at once against one shared [`ShutdownContext`]; the
//! registry waits for all of them (or the deadline) and reports the first
//! failure only after every callback has had its chance to run.

use crate::error::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Overall budget for flushing every pipeline at process exit.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline shared by all callbacks of one shutdown.
///
/// The token is cancelled when the deadline passes, so callbacks doing their
/// own async work can bail out cooperatively.
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    deadline: Instant,
    token: CancellationToken,
}

impl ShutdownContext {
    fn new(timeout: Duration) -> Self {
        let ctx = Self {
            deadline: Instant::now() + timeout,
            token: CancellationToken::new(),
        };

        let token = ctx.token.clone();
        let deadline = ctx.deadline;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        ctx
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the deadline passes.
    pub async fn expired(&self) {
        self.token.cancelled().await;
    }
}

type ShutdownFn = Box<dyn FnOnce(ShutdownContext) -> BoxFuture<'static, Result<()>> + Send>;

struct Entry {
    name: String,
    callback: ShutdownFn,
}

/// Ordered, append-only set of shutdown callbacks, consumed by [`ShutdownRegistry::shutdown`].
#[derive(Default)]
pub struct ShutdownRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback. Called only during startup.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, callback: F)
    where
        F: FnOnce(ShutdownContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.entries.push(Entry {
            name: name.into(),
            callback: Box::new(move |ctx| Box::pin(callback(ctx))),
        });
    }

    /// Register a blocking shutdown, run on the blocking pool with the time
    /// remaining before the deadline.
    pub fn register_blocking<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: FnOnce(Duration) -> Result<()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        self.register(name, move |ctx: ShutdownContext| async move {
            let remaining = ctx.remaining();
            tokio::task::spawn_blocking(move || callback(remaining))
                .await
                .map_err(|e| Error::Shutdown {
                    name: task_name,
                    reason: e.to_string(),
                })?
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Run every callback concurrently against one deadline.
    ///
    /// Returns the first error in completion order, after all callbacks have
    /// either finished or run out of time.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        let ctx = ShutdownContext::new(timeout);
        let mut tasks = JoinSet::new();

        for Entry { name, callback } in self.entries {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let callback_ctx = ctx.clone();
                let run =
                    AssertUnwindSafe(async move { callback(callback_ctx).await }).catch_unwind();
                let outcome = tokio::select! {
                    res = run => res.unwrap_or_else(|_| {
                        Err(Error::Shutdown {
                            name: name.clone(),
                            reason: "callback panicked".to_string(),
                        })
                    }),
                    _ = ctx.expired() => Err(Error::ShutdownTimeout { name: name.clone() }),
                };
                (name, outcome)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(pipeline = %name, "shut down"),
                Ok((name, Err(e))) => {
                    warn!(pipeline = %name, error = %e, "shutdown failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(error = %e, "shutdown task aborted");
                    first_error.get_or_insert(Error::Shutdown {
                        name: "unknown".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        ctx.token.cancel();
        first_error.map_or(Ok(()), Err)
    }
}
