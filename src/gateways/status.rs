//! Pure mapping from gateway status vocabulary to the internal enum.
//!
//! The mapping is total: an unrecognized provider status maps to `Pending`
//! rather than failing, so a provider vocabulary change degrades to "still
//! waiting" instead of dropping the notification. Callers log unknown inputs.

use crate::gateways::types::TransactionStatus;

pub fn map_midtrans_status(status: &str) -> TransactionStatus {
    match status.trim().to_lowercase().as_str() {
        "capture" | "settlement" => TransactionStatus::Success,
        "pending" => TransactionStatus::Pending,
        "deny" | "cancel" => TransactionStatus::Failed,
        "expire" => TransactionStatus::Expired,
        "refund" => TransactionStatus::Refunded,
        _ => TransactionStatus::Pending,
    }
}

pub fn map_doku_status(status: &str) -> TransactionStatus {
    match status.trim().to_uppercase().as_str() {
        "SUCCESS" => TransactionStatus::Success,
        "PENDING" => TransactionStatus::Pending,
        "FAILED" | "CANCELLED" => TransactionStatus::Failed,
        "EXPIRED" => TransactionStatus::Expired,
        "REFUNDED" => TransactionStatus::Refunded,
        _ => TransactionStatus::Pending,
    }
}

/// True when the mapper recognized the provider's vocabulary. Used only for
/// logging; the mapped value is authoritative either way.
pub fn is_known_midtrans_status(status: &str) -> bool {
    matches!(
        status.trim().to_lowercase().as_str(),
        "capture" | "settlement" | "pending" | "deny" | "cancel" | "expire" | "refund"
    )
}

pub fn is_known_doku_status(status: &str) -> bool {
    matches!(
        status.trim().to_uppercase().as_str(),
        "SUCCESS" | "PENDING" | "FAILED" | "CANCELLED" | "EXPIRED" | "REFUNDED"
    )
}
