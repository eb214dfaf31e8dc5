//! Engine services.
//!
//! - [`providers`] - HTTP clients for the consent and catalog collaborators
//! - [`transport`] - notification transport seam and SMTP implementation
//! - [`recovery`] - signed recovery tokens embedded in reminder links
//! - [`dispatcher`] - formats and hands off a single reminder
//! - [`merge`] - guest/owner cart reconciliation on identity linkage
//! - [`scheduler`] - the periodic reminder driver

pub mod dispatcher;
pub mod merge;
pub mod providers;
pub mod recovery;
pub mod scheduler;
pub mod transport;

pub use dispatcher::{DispatchError, DispatchReceipt, ReminderDispatcher};
pub use merge::{CartMergeService, LinkOutcome, MergeError};
pub use providers::{ConsentProvider, PricingProvider, ProviderError};
pub use recovery::{RecoveryClaims, RecoveryTokenError, RecoveryTokenSigner};
pub use scheduler::{ReminderScheduler, ReminderSchedule, ReminderTier, SchedulerHandle, TickSummary};
pub use transport::{NotificationTransport, ReminderMessage, TransportError};
