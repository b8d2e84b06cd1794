use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Requester,
    Approver,
    Implementer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Approver => "approver",
            Self::Implementer => "implementer",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "requester" => Some(Self::Requester),
            "approver" => Some(Self::Approver),
            "implementer" => Some(Self::Implementer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Admin satisfies every role gate.
    pub fn satisfies(&self, required: Role) -> bool {
        *self == Role::Admin || *self == required
    }
}

/// The acting principal, resolved by the upstream identity collaborator and
/// passed explicitly into every workflow operation. No ambient session state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), name: name.into(), role }
    }
}
