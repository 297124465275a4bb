//! Daily execution projection

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::CoverageEngine;
use crate::context::CallContext;
use crate::error::Result;
use crate::plan::{PlanState, UiState};
use crate::storage::{ExtraShiftStore, PlanEntryStore, PostStore};

/// One post's line on the daily sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAssignment {
    pub post_id: String,
    pub installation_id: String,
    pub role_id: String,
    pub entry_id: String,
    pub date: NaiveDate,
    pub state: PlanState,
    pub ui_state: UiState,
    /// Planned guard, or the absent one
    pub guard_id: Option<String>,
    /// Guard standing in through a live extra shift
    pub covering_guard_id: Option<String>,
    pub extra_shift_id: Option<String>,
}

impl CoverageEngine {
    /// Every plan entry of the tenant on one date, with live coverage
    pub fn get_daily_view(&self, ctx: &CallContext, date: NaiveDate) -> Result<Vec<DailyAssignment>> {
        let conn = self.db.conn();
        let posts: HashMap<String, _> = PostStore::new(conn)
            .list_active(&ctx.tenant_id)?
            .into_iter()
            .map(|post| (post.id.clone(), post))
            .collect();

        // Newest first per post, so the first hit wins on a duplicated key
        let mut coverage = HashMap::new();
        for record in ExtraShiftStore::new(conn).list_active_for_date(&ctx.tenant_id, date)? {
            coverage.entry(record.post_id.clone()).or_insert(record);
        }

        let view = PlanEntryStore::new(conn)
            .list_for_date(&ctx.tenant_id, date)?
            .into_iter()
            .filter_map(|entry| {
                let post = posts.get(&entry.post_id)?;
                let record = coverage.get(&entry.post_id);
                Some(DailyAssignment {
                    post_id: entry.post_id.clone(),
                    installation_id: post.installation_id.clone(),
                    role_id: post.role_id.clone(),
                    entry_id: entry.id,
                    date: entry.date,
                    state: entry.state,
                    ui_state: entry.ui_state,
                    guard_id: entry.guard_id,
                    covering_guard_id: record.map(|r| r.covering_guard_id.clone()),
                    extra_shift_id: record.map(|r| r.id.clone()),
                })
            })
            .collect();
        Ok(view)
    }
}
