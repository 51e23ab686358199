use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::call::CallId;
use crate::domain::TenantId;

pub const CALL_COMPLETED_REASON: &str = "call.completed";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditDebit {
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: String,
    pub tenant_id: TenantId,
    pub call_id: CallId,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingPolicy {
    pub credits_per_minute: Decimal,
    pub minimum_debit: Decimal,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self { credits_per_minute: Decimal::ONE, minimum_debit: Decimal::ZERO }
    }
}

impl BillingPolicy {
    /// Started minutes are billed in full.
    pub fn debit_for(&self, duration_secs: u32) -> CreditDebit {
        let minutes = Decimal::from(duration_secs.div_ceil(60));
        let amount = (minutes * self.credits_per_minute).max(self.minimum_debit);
        CreditDebit { amount, reason: CALL_COMPLETED_REASON.to_string() }
    }
}
