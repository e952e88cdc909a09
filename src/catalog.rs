//! Cached Planning Center operations and the invalidation each write needs.
//!
//! Read operations are identified by name; their positional arguments are the
//! identifying arguments in the order the lookup takes them (the API client
//! is never part of the key). A write is described by a [`Mutation`], whose
//! [`invalidation_plan`](Mutation::invalidation_plan) names the reads it
//! makes stale.

use crate::cache::{CacheManager, InvalidationPlan, Memoizer};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How long results of one read operation stay fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub operation: &'static str,
    pub ttl: Duration,
}

impl CachePolicy {
    pub const fn new(operation: &'static str, ttl_secs: u64) -> Self {
        Self { operation, ttl: Duration::from_secs(ttl_secs) }
    }

    pub fn memoizer(&self, manager: Arc<CacheManager>) -> Memoizer {
        Memoizer::new(manager, self.operation).with_ttl(self.ttl)
    }
}

/// People API.
pub mod people {
    use super::CachePolicy;

    /// Args: `(first_name, last_name)`.
    pub const FIND_PERSON_BY_NAME: CachePolicy = CachePolicy::new("find_person_by_name", 300);
    /// Args: `(person_id,)`.
    pub const GET_PERSON_BY_ID: CachePolicy = CachePolicy::new("get_person_by_id", 600);
    /// Args: `(person_id,)`.
    pub const GET_PERSON_EMAILS: CachePolicy = CachePolicy::new("get_person_emails", 600);
}

/// Services API. Service types rarely change; schedules change often.
pub mod services {
    use super::CachePolicy;

    /// Args: `()`.
    pub const GET_SERVICE_TYPES: CachePolicy = CachePolicy::new("get_service_types", 3600);
    /// Args: `(service_type_id,)`.
    pub const GET_SERVICE_TYPE_BY_ID: CachePolicy = CachePolicy::new("get_service_type_by_id", 3600);
    /// Args: `(service_type_id, filter, order)`.
    pub const GET_PLANS: CachePolicy = CachePolicy::new("get_plans", 300);
    /// Args: `(service_type_id, plan_id)`.
    pub const GET_PLAN_BY_ID: CachePolicy = CachePolicy::new("get_plan_by_id", 300);
    /// Args: `(service_type_id,)`.
    pub const GET_TEAMS: CachePolicy = CachePolicy::new("get_teams", 600);
    /// Args: `(service_type_id, team_id)`.
    pub const GET_TEAM_BY_ID: CachePolicy = CachePolicy::new("get_team_by_id", 600);
    /// Args: `(service_type_id, team_id)`.
    pub const GET_TEAM_POSITIONS: CachePolicy = CachePolicy::new("get_team_positions", 600);
    /// Args: `(service_type_id, plan_id)`.
    pub const GET_PLAN_PEOPLE: CachePolicy = CachePolicy::new("get_plan_people", 180);
}

pub const ALL: &[CachePolicy] = &[
    people::FIND_PERSON_BY_NAME,
    people::GET_PERSON_BY_ID,
    people::GET_PERSON_EMAILS,
    services::GET_SERVICE_TYPES,
    services::GET_SERVICE_TYPE_BY_ID,
    services::GET_PLANS,
    services::GET_PLAN_BY_ID,
    services::GET_TEAMS,
    services::GET_TEAM_BY_ID,
    services::GET_TEAM_POSITIONS,
    services::GET_PLAN_PEOPLE,
];

pub fn policy(operation: &str) -> Option<&'static CachePolicy> {
    ALL.iter().find(|p| p.operation == operation)
}

/// A completed write against Planning Center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    PersonCreated { first_name: String, last_name: String },
    PersonUpdated { person_id: String },
    PersonDeleted { person_id: String },
    EmailAdded { person_id: String },
    EmailUpdated { person_id: String },
    EmailDeleted { person_id: String },
    PlanCreated { service_type_id: String },
    PlanUpdated { service_type_id: String, plan_id: String },
    PlanDeleted { service_type_id: String, plan_id: String },
    PlanPersonAdded { service_type_id: String, plan_id: String },
    PlanPersonUpdated { service_type_id: String, plan_id: String },
    PlanPersonRemoved { service_type_id: String, plan_id: String },
}

impl Mutation {
    /// Reads made stale by this write.
    ///
    /// Name searches and plan listings take arguments a write cannot
    /// reconstruct (a renamed person, arbitrary filters), so those are
    /// invalidated for the whole operation.
    pub fn invalidation_plan(&self) -> Result<InvalidationPlan> {
        use self::people::*;
        use self::services::*;

        let plan = InvalidationPlan::new();
        Ok(match self {
            Mutation::PersonCreated { first_name, last_name } => {
                plan.exact(FIND_PERSON_BY_NAME.operation, &(first_name, last_name))?
            }
            Mutation::PersonUpdated { person_id } => plan
                .exact(GET_PERSON_BY_ID.operation, &(person_id,))?
                .operation(FIND_PERSON_BY_NAME.operation),
            Mutation::PersonDeleted { person_id } => plan
                .exact(GET_PERSON_BY_ID.operation, &(person_id,))?
                .exact(GET_PERSON_EMAILS.operation, &(person_id,))?
                .operation(FIND_PERSON_BY_NAME.operation),
            Mutation::EmailAdded { person_id }
            | Mutation::EmailUpdated { person_id }
            | Mutation::EmailDeleted { person_id } => {
                plan.exact(GET_PERSON_EMAILS.operation, &(person_id,))?
            }
            Mutation::PlanCreated { .. } => plan.operation(GET_PLANS.operation),
            Mutation::PlanUpdated { service_type_id, plan_id } => plan
                .exact(GET_PLAN_BY_ID.operation, &(service_type_id, plan_id))?
                .operation(GET_PLANS.operation),
            Mutation::PlanDeleted { service_type_id, plan_id } => plan
                .exact(GET_PLAN_BY_ID.operation, &(service_type_id, plan_id))?
                .exact(GET_PLAN_PEOPLE.operation, &(service_type_id, plan_id))?
                .operation(GET_PLANS.operation),
            Mutation::PlanPersonAdded { service_type_id, plan_id }
            | Mutation::PlanPersonUpdated { service_type_id, plan_id }
            | Mutation::PlanPersonRemoved { service_type_id, plan_id } => {
                plan.exact(GET_PLAN_PEOPLE.operation, &(service_type_id, plan_id))?
            }
        })
    }
}
