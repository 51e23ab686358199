use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::credit::CreditDebit;
use crate::domain::resource::{RemoteId, ResourceId};
use crate::domain::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "ringing" => Some(Self::Ringing),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Ringing => 1,
            Self::InProgress => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// Transitions only move forward and never leave a terminal state, so
    /// duplicate or out-of-order deliveries become no-ops.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    pub tenant_id: TenantId,
    pub remote_call_id: RemoteId,
    pub agent_id: ResourceId,
    pub batch_id: Option<ResourceId>,
    pub to_number: String,
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u32>,
    pub failure_reason: Option<String>,
    pub transcript: Option<String>,
    pub analysis: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// The record after `transition` is applied. Callers check
    /// [`CallStatus::can_transition_to`] first.
    pub fn advanced(&self, transition: &CallTransition) -> CallRecord {
        let mut next = self.clone();
        next.status = transition.to;
        if transition.to == CallStatus::InProgress && next.started_at.is_none() {
            next.started_at = Some(transition.at);
        }
        if transition.to.is_terminal() {
            next.ended_at = Some(transition.at);
        }
        if transition.duration_secs.is_some() {
            next.duration_secs = transition.duration_secs;
        }
        if transition.failure_reason.is_some() {
            next.failure_reason = transition.failure_reason.clone();
        }
        next.updated_at = transition.at;
        next
    }
}

/// A requested status change plus the side effects that must commit with it.
#[derive(Clone, Debug, PartialEq)]
pub struct CallTransition {
    pub to: CallStatus,
    pub at: DateTime<Utc>,
    pub duration_secs: Option<u32>,
    pub failure_reason: Option<String>,
    pub debit: Option<CreditDebit>,
}

impl CallTransition {
    pub fn to(status: CallStatus, at: DateTime<Utc>) -> Self {
        Self { to: status, at, duration_secs: None, failure_reason: None, debit: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransitionOutcome {
    Applied { previous: CallStatus, record: CallRecord },
    Unchanged { current: CallRecord },
    NotFound,
}

/// Post-call data fetched or pushed after the call is over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallDetails {
    pub transcript: Option<String>,
    pub analysis: Option<Value>,
}

impl CallDetails {
    pub fn is_empty(&self) -> bool {
        self.transcript.is_none() && self.analysis.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed_calls: u32,
    pub failed_calls: u32,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{CallId, CallRecord, CallStatus, CallTransition};
    use crate::domain::resource::{RemoteId, ResourceId};
    use crate::domain::TenantId;

    #[test]
    fn advancing_sets_timestamps_once() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("valid time");
        let record = CallRecord {
            id: CallId("call_1".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            remote_call_id: RemoteId("c-123".to_string()),
            agent_id: ResourceId("agt_1".to_string()),
            batch_id: None,
            to_number: "+15550100".to_string(),
            status: CallStatus::Queued,
            started_at: None,
            ended_at: None,
            duration_secs: None,
            failure_reason: None,
            transcript: None,
            analysis: None,
            created_at: created,
            updated_at: created,
        };

        let started_at = created + Duration::seconds(5);
        let in_progress = record.advanced(&CallTransition::to(CallStatus::InProgress, started_at));
        assert_eq!(in_progress.started_at, Some(started_at));
        assert_eq!(in_progress.ended_at, None);

        let ended_at = started_at + Duration::seconds(61);
        let mut ended = CallTransition::to(CallStatus::Completed, ended_at);
        ended.duration_secs = Some(61);
        let completed = in_progress.advanced(&ended);
        assert_eq!(completed.status, CallStatus::Completed);
        assert_eq!(completed.started_at, Some(started_at));
        assert_eq!(completed.ended_at, Some(ended_at));
        assert_eq!(completed.duration_secs, Some(61));
        assert_eq!(completed.updated_at, ended_at);
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(CallStatus::Queued.can_transition_to(CallStatus::Ringing));
        assert!(CallStatus::Queued.can_transition_to(CallStatus::Completed));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::InProgress));
        assert!(CallStatus::InProgress.can_transition_to(CallStatus::Failed));

        assert!(!CallStatus::InProgress.can_transition_to(CallStatus::Ringing));
        assert!(!CallStatus::InProgress.can_transition_to(CallStatus::InProgress));
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for next in [
            CallStatus::Queued,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert!(!CallStatus::Completed.can_transition_to(next));
            assert!(!CallStatus::Failed.can_transition_to(next));
        }
    }
}
