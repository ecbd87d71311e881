//! Error types for repair-tree operations.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepairTreeError {
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid item {id}: {reason}")]
    InvalidItem { id: Uuid, reason: String },

    #[error("Double billing on subscription {subscription_id}: {detail}")]
    DoubleBilling {
        subscription_id: Uuid,
        detail: String,
    },

    #[error("Dangling repair {repair_id}: {detail}")]
    DanglingRepair { repair_id: Uuid, detail: String },

    #[error("Adjustment targets unknown item {0}")]
    UnknownAdjustmentTarget(Uuid),

    #[error("Currency mismatch: expected {expected}, found {found} on item {id}")]
    CurrencyMismatch {
        id: Uuid,
        expected: String,
        found: String,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, RepairTreeError>;
