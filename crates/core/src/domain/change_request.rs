use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRequestId(pub String);

impl std::fmt::Display for ChangeRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// Human-facing request number, `CR-<year>-<4-digit sequence>`.
///
/// Allocated exactly once at creation, unique within a project scope for all
/// time, and never reused even after the request is deleted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestNumber(pub String);

impl RequestNumber {
    pub fn format(year: i32, sequence: u32) -> Self {
        Self(format!("CR-{year}-{sequence:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Implemented,
}

impl ChangeRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Implemented => "implemented",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "implemented" => Some(Self::Implemented),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Training,
    Timeline,
    Budget,
    Technical,
    Resource,
    Others,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Timeline => "timeline",
            Self::Budget => "budget",
            Self::Technical => "technical",
            Self::Resource => "resource",
            Self::Others => "others",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "training" => Some(Self::Training),
            "timeline" => Some(Self::Timeline),
            "budget" => Some(Self::Budget),
            "technical" => Some(Self::Technical),
            "resource" => Some(Self::Resource),
            "others" => Some(Self::Others),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Minor,
    Moderate,
    Significant,
    Major,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Significant => "significant",
            Self::Major => "major",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "minor" => Some(Self::Minor),
            "moderate" => Some(Self::Moderate),
            "significant" => Some(Self::Significant),
            "major" => Some(Self::Major),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub id: ChangeRequestId,
    pub project_id: ProjectId,
    pub request_number: RequestNumber,
    pub category: Category,
    pub priority: Priority,
    pub impact_level: ImpactLevel,
    pub title: String,
    pub description: String,
    pub justification: Option<String>,
    pub proposed_solution: Option<String>,
    pub estimated_effort: Option<String>,
    pub estimated_cost: Option<String>,
    pub target_implementation_date: Option<NaiveDate>,
    pub requested_by_id: String,
    pub requested_by_name: String,
    pub status: ChangeRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub implemented_at: Option<DateTime<Utc>>,
    pub actual_implementation_date: Option<NaiveDate>,
}

impl ChangeRequest {
    pub fn is_pending_approval(&self) -> bool {
        self.status == ChangeRequestStatus::Submitted
    }

    /// Lifecycle timestamps in the order they are set. Non-null entries must
    /// be non-decreasing for the record to be internally consistent.
    pub fn lifecycle_timestamps(&self) -> Vec<DateTime<Utc>> {
        [Some(self.created_at), self.submitted_at, self.decided_at, self.implemented_at]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, ChangeRequestStatus, ImpactLevel, Priority, RequestNumber};

    #[test]
    fn request_number_is_zero_padded_to_four_digits() {
        assert_eq!(RequestNumber::format(2026, 1).as_str(), "CR-2026-0001");
        assert_eq!(RequestNumber::format(2026, 42).as_str(), "CR-2026-0042");
        assert_eq!(RequestNumber::format(2026, 12345).as_str(), "CR-2026-12345");
    }

    #[test]
    fn status_round_trips_through_storage_representation() {
        for status in [
            ChangeRequestStatus::Draft,
            ChangeRequestStatus::Submitted,
            ChangeRequestStatus::Approved,
            ChangeRequestStatus::Rejected,
            ChangeRequestStatus::Implemented,
        ] {
            assert_eq!(ChangeRequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChangeRequestStatus::parse("cancelled"), None);
    }

    #[test]
    fn classification_enums_reject_unknown_values() {
        assert_eq!(Category::parse("training"), Some(Category::Training));
        assert_eq!(Category::parse("scope"), None);
        assert_eq!(Priority::parse("critical"), Some(Priority::Critical));
        assert_eq!(Priority::parse("urgent"), None);
        assert_eq!(ImpactLevel::parse("major"), Some(ImpactLevel::Major));
        assert_eq!(ImpactLevel::parse("severe"), None);
    }
}
