use parking_lot::Mutex;

use crate::error::SyncError;

/// Where a swallowed failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    InitialLoad,
    BackgroundRefresh,
    Transport,
    GroupPermissions,
    Setup,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureStage::InitialLoad => "initial load",
            FailureStage::BackgroundRefresh => "background refresh",
            FailureStage::Transport => "transport",
            FailureStage::GroupPermissions => "group permissions",
            FailureStage::Setup => "setup",
        };
        f.write_str(s)
    }
}

/// Decides what happens to failures the sync manager never surfaces.
///
/// The manager always keeps its last-known state (or falls back to an empty,
/// deny-all set before the first load); the policy only observes.
pub trait FailurePolicy: Send + Sync {
    fn swallow(&self, stage: FailureStage, error: &SyncError);
}

/// Log and move on
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFallback;

impl FailurePolicy for SilentFallback {
    fn swallow(&self, stage: FailureStage, error: &SyncError) {
        tracing::warn!("{} failed, keeping last known permissions: {}", stage, error);
    }
}

/// Logs like `SilentFallback` and keeps every swallowed failure for inspection
#[derive(Debug, Default)]
pub struct RecordingPolicy {
    swallowed: Mutex<Vec<(FailureStage, SyncError)>>,
}

impl RecordingPolicy {
    pub fn swallowed(&self) -> Vec<(FailureStage, SyncError)> {
        self.swallowed.lock().clone()
    }

    pub fn count(&self, stage: FailureStage) -> usize {
        self.swallowed.lock().iter().filter(|(s, _)| *s == stage).count()
    }
}

impl FailurePolicy for RecordingPolicy {
    fn swallow(&self, stage: FailureStage, error: &SyncError) {
        SilentFallback.swallow(stage, error);
        self.swallowed.lock().push((stage, error.clone()));
    }
}
