//! Dealership and consultant lookups. The production directory lives in
//! another service; `StaticDirectory` serves a JSON seed file.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultant {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dealership {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    /// Directory order; the resolver tries consultants in this order.
    #[serde(default)]
    pub consultants: Vec<Consultant>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("invalid directory seed: {0}")]
    Seed(String),
}

#[async_trait]
pub trait ConsultantDirectory: Send + Sync {
    /// Active consultants of a dealership, in directory order.
    async fn list_consultants(&self, dealership_id: &str) -> Result<Vec<Consultant>, DirectoryError>;

    async fn get_consultant(
        &self,
        dealership_id: &str,
        consultant_id: &str,
    ) -> Result<Option<Consultant>, DirectoryError>;

    async fn get_dealership(&self, dealership_id: &str) -> Result<Option<Dealership>, DirectoryError>;
}

/// Picks a dealership for a fleet vehicle when the caller did not choose one.
#[async_trait]
pub trait DealershipLocator: Send + Sync {
    async fn locate(&self, fleet_account_id: &str, plate: &str) -> Result<Option<Dealership>, DirectoryError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDirectory {
    #[serde(default)]
    pub dealerships: Vec<Dealership>,
    /// Preferred dealership per fleet account.
    #[serde(default)]
    pub fleet_dealerships: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(dealerships: Vec<Dealership>) -> Self {
        Self {
            dealerships,
            fleet_dealerships: HashMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        serde_json::from_str(json).map_err(|e| DirectoryError::Seed(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Seed(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    fn dealership(&self, id: &str) -> Option<&Dealership> {
        self.dealerships.iter().find(|d| d.id == id)
    }
}

#[async_trait]
impl ConsultantDirectory for StaticDirectory {
    async fn list_consultants(&self, dealership_id: &str) -> Result<Vec<Consultant>, DirectoryError> {
        Ok(self
            .dealership(dealership_id)
            .map(|d| d.consultants.iter().filter(|c| c.active).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_consultant(
        &self,
        dealership_id: &str,
        consultant_id: &str,
    ) -> Result<Option<Consultant>, DirectoryError> {
        Ok(self
            .dealership(dealership_id)
            .and_then(|d| d.consultants.iter().find(|c| c.id == consultant_id && c.active))
            .cloned())
    }

    async fn get_dealership(&self, dealership_id: &str) -> Result<Option<Dealership>, DirectoryError> {
        Ok(self.dealership(dealership_id).cloned())
    }
}

#[async_trait]
impl DealershipLocator for StaticDirectory {
    async fn locate(&self, fleet_account_id: &str, _plate: &str) -> Result<Option<Dealership>, DirectoryError> {
        let preferred = self
            .fleet_dealerships
            .get(fleet_account_id)
            .and_then(|id| self.dealership(id));
        Ok(preferred.or_else(|| self.dealerships.first()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"{
        "dealerships": [
            {"id": "d1", "name": "North", "consultants": [
                {"id": "c2", "name": "Bea"},
                {"id": "c1", "name": "Al"},
                {"id": "c3", "name": "Cy", "active": false}
            ]},
            {"id": "d2", "name": "South", "city": "Campinas"}
        ],
        "fleet_dealerships": {"f9": "d2"}
    }"#;

    #[tokio::test]
    async fn seed_keeps_directory_order_and_skips_inactive() {
        let dir = StaticDirectory::from_json(SEED).unwrap();
        let ids: Vec<String> = dir
            .list_consultants("d1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c2", "c1"]);
        assert!(dir.get_consultant("d1", "c3").await.unwrap().is_none());
        assert!(dir.list_consultants("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn locator_prefers_fleet_dealership() {
        let dir = StaticDirectory::from_json(SEED).unwrap();
        assert_eq!(dir.locate("f9", "ABC").await.unwrap().unwrap().id, "d2");
        assert_eq!(dir.locate("f1", "ABC").await.unwrap().unwrap().id, "d1");
        assert!(StaticDirectory::default().locate("f1", "ABC").await.unwrap().is_none());
    }

    #[test]
    fn invalid_seed_is_an_error() {
        assert!(matches!(StaticDirectory::from_json("{"), Err(DirectoryError::Seed(_))));
    }
}
