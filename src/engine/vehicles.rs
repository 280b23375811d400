use futures::FutureExt;

use super::*;
use crate::cache::{CacheError, FetchFuture, Snapshot};
use crate::store::{BY_ACCOUNT, BY_IDENTIFICATION, IndexQuery, StoreError};

#[derive(Debug, Clone, Default)]
pub struct VehicleInput {
    pub identification: String,
    pub model: Option<String>,
    pub fleet_asset_id: Option<String>,
}

impl Engine {
    /// Register a vehicle for the caller's account. Registering the same
    /// identification twice returns the existing vehicle.
    pub async fn register_vehicle(&self, caller: &Caller, input: VehicleInput) -> Result<Vehicle, EngineError> {
        let identification = normalize_identification(&input.identification);
        let mut v = Validator::new();
        v.required("identification", &identification, MAX_CHASSIS_LEN);
        v.optional("model", input.model.as_deref(), MAX_CAMPAIGN_LEN);
        v.optional("fleet_asset_id", input.fleet_asset_id.as_deref(), MAX_ID_LEN);
        v.finish()?;

        if let Some(existing) = self.stored_vehicle(&caller.account_id, &identification).await? {
            return Ok(existing);
        }
        let vehicle = Vehicle {
            id: new_id(),
            identification,
            account_id: caller.account_id.clone(),
            model: trimmed(input.model),
            fleet_asset_id: trimmed(input.fleet_asset_id),
            created_at: now_ms(),
        };
        self.repo.put(&vehicle).await?;
        Ok(vehicle)
    }

    async fn stored_vehicle(&self, account_id: &str, identification: &str) -> Result<Option<Vehicle>, EngineError> {
        let query = IndexQuery::new(BY_ACCOUNT, account_id).range(SortRange::BeginsWith(identification.to_string()));
        let vehicles = self.repo.query_all::<Vehicle>(query).await?;
        Ok(vehicles.into_iter().find(|v| v.identification == identification))
    }

    /// Identifier lookup: the cached snapshot first, the store on a miss.
    /// A missing or stale snapshot schedules a background refresh.
    pub async fn resolve_vehicle(
        &self,
        account_id: &str,
        identification: &str,
    ) -> Result<Option<IdentifierRecord>, EngineError> {
        let identification = normalize_identification(identification);
        if identification.is_empty() {
            return Ok(None);
        }
        self.cache.ensure_fresh(account_id, self.identifier_fetch(account_id));
        if let Some(hit) = self
            .cache
            .get(account_id)
            .and_then(|s| s.lookup(&identification).cloned())
        {
            return Ok(Some(hit));
        }
        Ok(self
            .stored_vehicle(account_id, &identification)
            .await?
            .map(|v| IdentifierRecord::from(&v)))
    }

    /// Fetch used by the identifier cache: every vehicle of the account,
    /// plus other accounts' vehicles sharing one of its identifications.
    pub fn identifier_fetch(&self, account_id: &str) -> impl FnOnce() -> FetchFuture + Send + 'static {
        let repo = self.repo.clone();
        let account_id = account_id.to_string();
        move || {
            async move {
                let fetch_err = |e: StoreError| CacheError::Fetch(e.to_string());
                let own = repo
                    .query_all::<Vehicle>(IndexQuery::new(BY_ACCOUNT, account_id.clone()))
                    .await
                    .map_err(fetch_err)?;
                let mut records: Vec<IdentifierRecord> = own.iter().map(IdentifierRecord::from).collect();
                for vehicle in &own {
                    let matches = repo
                        .query_all::<Vehicle>(IndexQuery::new(BY_IDENTIFICATION, vehicle.identification.clone()))
                        .await
                        .map_err(fetch_err)?;
                    records.extend(
                        matches
                            .iter()
                            .filter(|m| m.account_id != account_id)
                            .map(IdentifierRecord::from),
                    );
                }
                Ok::<_, CacheError>(records)
            }
            .boxed()
        }
    }

    /// Synchronous warm-up of one tenant's snapshot.
    pub async fn warm_identifiers(&self, account_id: &str) -> Result<Arc<Snapshot>, CacheError> {
        self.cache
            .force_refresh(account_id, self.identifier_fetch(account_id))
            .await
    }
}
