//! Dashboard aggregation over a project's change requests.

use std::collections::BTreeMap;

use serde::Serialize;

use changeflow_core::domain::change_request::{ChangeRequest, ChangeRequestStatus, ProjectId};
use changeflow_db::repositories::{ChangeRequestRepository, GroupedCounts};

use crate::engine::EngineError;

const RECENT_LIMIT: u32 = 5;

/// Aggregated counts for one project. Keys with a zero count are omitted
/// from the maps rather than reported as zero.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestStats {
    pub total: i64,
    pub pending_approvals: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
    pub recent_requests: Vec<ChangeRequest>,
}

impl ChangeRequestStats {
    fn from_parts(counts: GroupedCounts, recent_requests: Vec<ChangeRequest>) -> Self {
        let by_status: BTreeMap<String, i64> = counts
            .by_status
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();
        let by_priority = counts
            .by_priority
            .into_iter()
            .map(|(priority, count)| (priority.as_str().to_string(), count))
            .collect();
        let by_category = counts
            .by_category
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), count))
            .collect();

        let total = by_status.values().sum();
        let pending_approvals = by_status
            .get(ChangeRequestStatus::Submitted.as_str())
            .copied()
            .unwrap_or_default();

        Self { total, pending_approvals, by_status, by_priority, by_category, recent_requests }
    }
}

pub(crate) async fn project_stats(
    requests: &dyn ChangeRequestRepository,
    project_id: &ProjectId,
) -> Result<ChangeRequestStats, EngineError> {
    let counts = requests.group_counts(project_id).await?;
    let recent = requests.recent(project_id, RECENT_LIMIT).await?;
    Ok(ChangeRequestStats::from_parts(counts, recent))
}
