//! Payment Status Normalization
//!
//! Processors report status in their own vocabulary. Every flow reasons
//! over the three normalized states below.

use serde::{Deserialize, Serialize};

/// Normalized payment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Canceled,
}

const PAID: &[&str] = &[
    "paid",
    "succeeded",
    "success",
    "completed",
    "complete",
    "captured",
    "confirmed",
    "approved",
    "settled",
    "no_payment_required",
];

const CANCELED: &[&str] = &[
    "canceled",
    "cancelled",
    "void",
    "voided",
    "failed",
    "declined",
    "error",
    "expired",
    "refused",
    "rejected",
];

/// Statuses known to mean "not settled yet"
const PENDING: &[&str] = &[
    "pending",
    "unpaid",
    "open",
    "created",
    "new",
    "processing",
    "in_progress",
    "waiting",
    "authorized",
    "requires_action",
    "requires_capture",
    "requires_confirmation",
    "requires_payment_method",
];

impl PaymentStatus {
    /// Map a raw processor status. Total: anything unrecognized, empty or
    /// absent is `Pending`.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return PaymentStatus::Pending;
        };
        let status = raw.trim().to_ascii_lowercase();
        if PAID.contains(&status.as_str()) {
            PaymentStatus::Paid
        } else if CANCELED.contains(&status.as_str()) {
            PaymentStatus::Canceled
        } else {
            PaymentStatus::Pending
        }
    }

    /// Whether a raw status is part of any known vocabulary. Unrecognized
    /// strings still normalize to `Pending`; callers that must tell "still
    /// waiting" from "no idea" check this first.
    pub fn is_recognized(raw: &str) -> bool {
        let status = raw.trim().to_ascii_lowercase();
        [PAID, PENDING, CANCELED]
            .iter()
            .any(|known| known.contains(&status.as_str()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Paid)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
