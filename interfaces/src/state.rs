use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Decision a reviewer can record against an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalState::Approved | ApprovalState::Rejected)
    }
}

/// Stored lifecycle status of an artifact.
///
/// `Blocked` is written once by the generation step when a guardrail halts
/// the chain. It is an audit state: reviewers never see it and cannot move
/// an artifact into or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Approved,
    Rejected,
    Blocked,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Approved => "approved",
            ArtifactStatus::Rejected => "rejected",
            ArtifactStatus::Blocked => "blocked",
        }
    }

    pub fn is_reviewable(&self) -> bool {
        !matches!(self, ArtifactStatus::Blocked)
    }

    /// Any reviewable status may move to any approval state. Overwriting a
    /// terminal decision is allowed so reviewers can correct themselves.
    pub fn can_transition_to(&self, _target: ApprovalState) -> bool {
        self.is_reviewable()
    }
}

impl From<ApprovalState> for ArtifactStatus {
    fn from(state: ApprovalState) -> Self {
        match state {
            ApprovalState::Pending => ArtifactStatus::Pending,
            ApprovalState::Approved => ArtifactStatus::Approved,
            ApprovalState::Rejected => ArtifactStatus::Rejected,
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown artifact status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ArtifactStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ArtifactStatus::Pending),
            "approved" => Ok(ArtifactStatus::Approved),
            "rejected" => Ok(ArtifactStatus::Rejected),
            "blocked" => Ok(ArtifactStatus::Blocked),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for ApprovalState {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ApprovalState::Pending),
            "approved" => Ok(ApprovalState::Approved),
            "rejected" => Ok(ApprovalState::Rejected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_decisions_can_be_corrected() {
        let approved = ArtifactStatus::from(ApprovalState::Approved);
        assert!(approved.can_transition_to(ApprovalState::Rejected));
        assert!(ApprovalState::Rejected.is_terminal());
        assert!(!ApprovalState::Pending.is_terminal());
    }

    #[test]
    fn blocked_is_not_reviewable() {
        assert!(!ArtifactStatus::Blocked.can_transition_to(ApprovalState::Approved));
        assert_eq!("blocked".parse::<ArtifactStatus>(), Ok(ArtifactStatus::Blocked));
        assert!("blocked".parse::<ApprovalState>().is_err());
    }
}
