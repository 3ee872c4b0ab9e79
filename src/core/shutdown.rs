//! Hard-deadline supervision for the forced close path.
use std::{future::Future, sync::Arc, time::Duration};

/// Called with a reason when the process cannot continue.
pub type ProcessHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Default action when a hard close overruns its deadline.
pub fn abort_process() -> ProcessHook {
    Arc::new(|reason: &str| {
        tracing::error!("{reason}; aborting process");
        std::process::abort();
    })
}

/// Default action when a serving task fails.
pub fn exit_process() -> ProcessHook {
    Arc::new(|reason: &str| {
        tracing::error!("{reason}; exiting");
        std::process::exit(1);
    })
}

/// Races a close operation against a fixed deadline and runs the abort hook
/// if the deadline wins.
#[derive(Clone)]
pub struct ShutdownSupervisor {
    deadline: Duration,
    on_deadline: ProcessHook,
}

impl ShutdownSupervisor {
    pub fn new(deadline: Duration, on_deadline: ProcessHook) -> Self {
        Self {
            deadline,
            on_deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns the close output, or `None` after the hook ran.
    pub async fn supervise<F>(&self, close: F) -> Option<F::Output>
    where
        F: Future,
    {
        match tokio::time::timeout(self.deadline, close).await {
            Ok(output) => {
                tracing::debug!("Close finished before the hard deadline");
                Some(output)
            }
            Err(_) => {
                (self.on_deadline)(&format!(
                    "Hard close did not finish within {:?}",
                    self.deadline
                ));
                None
            }
        }
    }
}

impl std::fmt::Debug for ShutdownSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSupervisor")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
