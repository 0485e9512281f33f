use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Metadata, require_asset, require_created_at, require_raw, require_reference};
use crate::error::PluginResult;

/// An internal or external account as the provider reports it.
///
/// External accounts (beneficiaries, counterparties) share the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspAccount {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_asset: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub raw: Value,
}

impl PspAccount {
    pub fn validate(&self) -> PluginResult<()> {
        require_reference(&self.reference, "account")?;
        require_created_at(&self.reference, &self.created_at)?;
        require_raw(&self.reference, &self.raw)?;
        if let Some(asset) = &self.default_asset {
            require_asset(&self.reference, asset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn account() -> PspAccount {
        PspAccount {
            reference: "acc_1".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            name: Some("Main".into()),
            default_asset: Some("EUR/2".into()),
            metadata: Metadata::new(),
            raw: json!({"id": "acc_1"}),
        }
    }

    #[test]
    fn test_validate_account() {
        assert!(account().validate().is_ok());

        let mut a = account();
        a.reference.clear();
        assert!(a.validate().is_err());

        let mut a = account();
        a.default_asset = Some("EUR".into());
        assert!(a.validate().is_err());

        let mut a = account();
        a.raw = Value::Null;
        assert!(a.validate().is_err());

        let mut a = account();
        a.created_at = DateTime::<Utc>::default();
        assert!(a.validate().is_err());
    }

    #[test]
    fn test_account_wire_shape() {
        let json = serde_json::to_value(account()).unwrap();
        assert_eq!(json["defaultAsset"], "EUR/2");
        assert_eq!(json["reference"], "acc_1");
    }
}
