//! Explicit per-call context

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Tenant, actor and write-time "today" for one engine call
///
/// The authorization layer resolves tenant and actor before calling in; the
/// engine only scopes queries by tenant and stamps the actor into metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub tenant_id: String,
    pub actor_id: String,
    /// Entries dated before this are history
    pub today: NaiveDate,
}

impl CallContext {
    /// Context for the local calendar day
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            today: Local::now().date_naive(),
        }
    }

    /// Same caller, pinned to another day
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }
}
