use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use super::{amount_serde, require_asset, require_created_at, require_reference};
use crate::error::PluginResult;

/// Point-in-time balance snapshot for one account and asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspBalance {
    pub account_reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(with = "amount_serde")]
    pub amount: BigInt,
    pub asset: String,
}

impl PspBalance {
    pub fn validate(&self) -> PluginResult<()> {
        require_reference(&self.account_reference, "balance account")?;
        require_created_at(&self.account_reference, &self.created_at)?;
        require_asset(&self.account_reference, &self.asset)
    }
}
