//! Run-level cancellation.
//!
//! A single `watch` flag is flipped when the wall-clock deadline passes or
//! the operator hits Ctrl-C. Every long-running loop selects on
//! [`CancelFlag::cancelled`] and unwinds cooperatively.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    Deadline,
    Interrupted,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CancelReason::Deadline => "deadline reached",
            CancelReason::Interrupted => "interrupted",
        })
    }
}

/// Receiving side, cloned into every task.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancelFlag {
    /// A flag that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    /// Resolves once the flag is set; pends forever if it never can be.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if rx.borrow_and_update().is_some() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sending side.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl Canceller {
    /// First reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

pub fn cancellation() -> (Canceller, CancelFlag) {
    let (tx, rx) = watch::channel(None);
    (Canceller { tx: Arc::new(tx) }, CancelFlag { rx })
}

/// Background watcher that fires the flag on deadline or Ctrl-C.
pub struct DeadlineWatch {
    task: JoinHandle<()>,
}

impl DeadlineWatch {
    pub fn spawn(canceller: Canceller, deadline: Option<Duration>, listen_ctrl_c: bool) -> Self {
        let task = tokio::spawn(async move {
            let timer = async {
                match deadline {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            let interrupt = async {
                if listen_ctrl_c && tokio::signal::ctrl_c().await.is_ok() {
                    return;
                }
                std::future::pending::<()>().await;
            };
            tokio::select! {
                _ = timer => {
                    warn!(seconds = deadline.map(|d| d.as_secs()), "run deadline reached, cancelling");
                    canceller.cancel(CancelReason::Deadline);
                }
                _ = interrupt => {
                    warn!("interrupted, cancelling");
                    canceller.cancel(CancelReason::Interrupted);
                }
            }
        });
        Self { task }
    }
}

impl Drop for DeadlineWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
