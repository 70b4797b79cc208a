//! Sync engine: uploader, retry scheduler, and the escalation path.
//!
//! The seams to the host application are small traits: the connectivity
//! monitor, the credential source, and the user-facing notifier. The
//! engine is generic over them so tests can drive every failure mode
//! without a network.

pub mod escalation;
pub mod scheduler;
pub mod uploader;

pub use escalation::CaptureOutcome;
pub use scheduler::{CycleReport, RetryScheduler};
pub use uploader::{HttpUploader, UploadOutcome, Uploader};

/// Reports current reachability: connected *and* internet-reachable.
pub trait ConnectivityMonitor: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Supplies the current bearer token, or none.
///
/// Absence of a token is an expected state during initial launch, before
/// the user has signed in; it is never counted against the retry budget.
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Surfaces a synchronous, user-visible notification.
///
/// Last resort of the escalation path: when an error can be neither
/// delivered nor expected to deliver soon, the user is told instead of
/// the event being silently dropped.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Monitor that always reports online.
///
/// For callers without a platform reachability signal; the scheduler
/// already treats unreachable-network upload failures as transient, so
/// assuming online only costs wasted attempts, never correctness.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

impl ConnectivityMonitor for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Credential source backed by a fixed, optional token.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
