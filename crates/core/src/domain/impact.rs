use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::change_request::ChangeRequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImpactId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactArea {
    Schedule,
    Budget,
    Scope,
    Resource,
    Other,
}

impl ImpactArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Budget => "budget",
            Self::Scope => "scope",
            Self::Resource => "resource",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "schedule" => Some(Self::Schedule),
            "budget" => Some(Self::Budget),
            "scope" => Some(Self::Scope),
            "resource" => Some(Self::Resource),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Side record describing one area of impact of a change request.
///
/// Impacts are written once and never mutated; they are removed only when the
/// parent draft request is deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    pub id: ImpactId,
    pub change_request_id: ChangeRequestId,
    pub impact_area: ImpactArea,
    pub description: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}
