use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScrapePhase {
    Preview,
    Listing,
    Details,
    Extracting,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeProgress {
    pub current: usize,
    pub total: usize,
    pub item_label: String,
    pub phase: ScrapePhase,
}

/// Invoked synchronously after each item completes. Must not block.
pub type ProgressFn = dyn Fn(ScrapeProgress) + Send + Sync;

/// Counts completions and forwards them to an optional callback.
pub(crate) struct ProgressTicker<'a> {
    callback: Option<&'a ProgressFn>,
    done: AtomicUsize,
    total: usize,
    phase: ScrapePhase,
}

impl<'a> ProgressTicker<'a> {
    pub(crate) fn new(callback: Option<&'a ProgressFn>, total: usize, phase: ScrapePhase) -> Self {
        Self {
            callback,
            done: AtomicUsize::new(0),
            total,
            phase,
        }
    }

    pub(crate) fn tick(&self, label: &str) {
        let current = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(callback) = self.callback {
            callback(ScrapeProgress {
                current,
                total: self.total,
                item_label: label.to_string(),
                phase: self.phase,
            });
        }
    }
}

/// Callback plus receiver, for callers that prefer consuming progress as a stream
/// alongside awaiting the final result.
pub fn channel() -> (Box<ProgressFn>, mpsc::UnboundedReceiver<ScrapeProgress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |progress: ScrapeProgress| {
        // receiver may already be gone; progress is advisory
        let _ = tx.send(progress);
    };
    (Box::new(callback), rx)
}
