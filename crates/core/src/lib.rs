pub mod config;
pub mod domain;
pub mod drift;
pub mod errors;
pub mod fingerprint;
pub mod normalize;
pub mod retry;
pub mod signature;

pub use domain::call::{CallId, CallRecord, CallStatus, CallTransition, TransitionOutcome};
pub use domain::credit::{BillingPolicy, CreditDebit, CreditLedgerEntry};
pub use domain::idempotency::{CachedResponse, IdempotencyKey, IdempotencyRecord, InsertOutcome};
pub use domain::rate_limit::{RateLimitDecision, RateLimitRejection, RateLimitSubject};
pub use domain::resource::{
    RemoteId, RemoteObject, ResourceId, ResourceKind, ResourceSpec, SyncStatus, SyncedResource,
};
pub use domain::webhook::{WebhookEvent, WebhookEventType};
pub use domain::TenantId;
pub use drift::{reconcile, DriftAction, DriftReport};
pub use errors::{ApplicationError, InterfaceError, ProviderError};
pub use retry::{RetryExecutor, RetryPolicy};
pub use signature::{SignatureError, SignatureVerifier};
