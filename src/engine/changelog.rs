use serde::Serialize;
use serde_json::Value;

use super::*;
use crate::store::{IndexQuery, PRIMARY};

impl Engine {
    /// Append one entry with the field-level diff between `before` and
    /// `after`. A creation diffs against an empty object.
    pub(super) async fn record_change<T: Serialize>(
        &self,
        entity: EntityKind,
        entity_id: &str,
        action: &str,
        actor: &Caller,
        before: Option<&T>,
        after: &T,
    ) -> Result<ChangeLogEntry, EngineError> {
        let to_value = |v: &T| serde_json::to_value(v).map_err(|e| EngineError::Upstream(e.to_string()));
        let old = match before {
            Some(b) => to_value(b)?,
            None => Value::Object(Default::default()),
        };
        let entry = ChangeLogEntry {
            id: self.next_log_id(),
            entity,
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            actor: actor.user_id.clone(),
            at: now_ms(),
            changes: diff_values(&old, &to_value(after)?),
        };
        self.repo.put(&entry).await?;
        Ok(entry)
    }

    /// Every entry for an entity, oldest first.
    pub async fn change_log(&self, entity_id: &str) -> Result<Vec<ChangeLogEntry>, EngineError> {
        Ok(self
            .repo
            .query_all::<ChangeLogEntry>(IndexQuery::new(PRIMARY, entity_id))
            .await?)
    }
}
