//! Tree configuration.

use serde::{Deserialize, Serialize};

use crate::proration::ProrationPolicy;

/// What to do with a repair whose interval reaches outside the item it
/// points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleRepairPolicy {
    /// Log the repair and leave it out of the tree; the period counts as
    /// never repaired.
    #[default]
    Drop,
    /// Fail the build with a dangling-repair error.
    Reject,
}

/// Options for [`SubscriptionItemTree`](crate::SubscriptionItemTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeOptions {
    pub proration: ProrationPolicy,
    pub stale_repairs: StaleRepairPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proration::RoundingMode;

    #[test]
    fn test_defaults() {
        let options = TreeOptions::default();
        assert_eq!(options.proration.decimals, 2);
        assert_eq!(options.proration.rounding, RoundingMode::HalfUp);
        assert_eq!(options.stale_repairs, StaleRepairPolicy::Drop);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let options: TreeOptions =
            serde_json::from_str(r#"{"staleRepairs":"reject","proration":{"decimals":3}}"#)
                .unwrap();
        assert_eq!(options.stale_repairs, StaleRepairPolicy::Reject);
        assert_eq!(options.proration.decimals, 3);
        assert_eq!(options.proration.rounding, RoundingMode::HalfUp);
    }
}
