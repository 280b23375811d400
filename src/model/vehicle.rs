use serde::{Deserialize, Serialize};

use super::Ms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    /// Plate or chassis, normalized to uppercase without separators.
    pub identification: String,
    pub account_id: String,
    pub model: Option<String>,
    /// Asset number in the fleet's own system.
    pub fleet_asset_id: Option<String>,
    pub created_at: Ms,
}

/// One row of an identifier-cache snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRecord {
    pub internal_id: String,
    pub identification: String,
    pub account_id: String,
    pub fleet_asset_id: Option<String>,
}

impl From<&Vehicle> for IdentifierRecord {
    fn from(v: &Vehicle) -> Self {
        Self {
            internal_id: v.id.clone(),
            identification: v.identification.clone(),
            account_id: v.account_id.clone(),
            fleet_asset_id: v.fleet_asset_id.clone(),
        }
    }
}

pub fn normalize_identification(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_separators() {
        assert_eq!(normalize_identification("abc-1d23"), "ABC1D23");
        assert_eq!(normalize_identification(" 9bw zzz "), "9BWZZZ");
    }
}
