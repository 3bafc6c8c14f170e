use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a conversation stands with respect to its infrastructure configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No configuration has been requested yet.
    #[default]
    NotQueried,
    /// A configuration exists and is believed deployable.
    Queried,
    /// A configuration was requested but the last construct or edit attempt failed.
    QueriedNotDeployable,
    /// Set by the deployment collaborator once the configuration has been applied.
    Deployed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotQueried => "not_queried",
            Self::Queried => "queried",
            Self::QueriedNotDeployable => "queried_not_deployable",
            Self::Deployed => "deployed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_queried" => Some(Self::NotQueried),
            "queried" => Some(Self::Queried),
            "queried_not_deployable" => Some(Self::QueriedNotDeployable),
            "deployed" => Some(Self::Deployed),
            _ => None,
        }
    }

    pub fn has_been_queried(&self) -> bool {
        !matches!(self, Self::NotQueried)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub state: SessionState,
}

impl Session {
    pub fn new(id: SessionId, user_id: UserId) -> Self {
        Self { id, user_id, state: SessionState::NotQueried }
    }
}
