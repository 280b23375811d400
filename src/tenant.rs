use crate::auth::{Caller, Role};
use crate::store::{BY_DEALERSHIP, BY_FLEET, BY_TOWER};

/// The slice of data a caller may see: one tenant index partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub index: &'static str,
    pub partition: String,
    pub role: Role,
}

impl TenantScope {
    pub fn of(caller: &Caller) -> Self {
        let index = match caller.role {
            Role::Fleet => BY_FLEET,
            Role::Dealership => BY_DEALERSHIP,
            Role::Tower => BY_TOWER,
        };
        Self {
            index,
            partition: caller.account_id.clone(),
            role: caller.role,
        }
    }

    /// Whether an entity owned by these tenants is visible in this scope.
    pub fn covers(&self, fleet: &str, dealership: &str, tower: Option<&str>) -> bool {
        match self.role {
            Role::Fleet => fleet == self.partition,
            Role::Dealership => dealership == self.partition,
            Role::Tower => tower == Some(self.partition.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_picks_index_by_role() {
        let scope = TenantScope::of(&Caller::new(Role::Dealership, "d1", "u1"));
        assert_eq!(scope.index, BY_DEALERSHIP);
        assert_eq!(scope.partition, "d1");

        let scope = TenantScope::of(&Caller::new(Role::Tower, "t1", "u1"));
        assert_eq!(scope.index, BY_TOWER);
    }

    #[test]
    fn covers_checks_the_matching_tenant() {
        let fleet = TenantScope::of(&Caller::new(Role::Fleet, "f1", "u1"));
        assert!(fleet.covers("f1", "d9", None));
        assert!(!fleet.covers("f2", "f1", Some("f1")));

        let tower = TenantScope::of(&Caller::new(Role::Tower, "t1", "u1"));
        assert!(tower.covers("f1", "d1", Some("t1")));
        assert!(!tower.covers("f1", "d1", None));
    }
}
