//! Roles carried by bearer tokens.

use serde::{Deserialize, Serialize};

/// Role claim values recognized by the control plane.
///
/// Mutation privilege belongs to `Admin` and `Referee`; every other role is
/// subscribe-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Organizer,
    Competitor,
    Referee,
    Coach,
}

impl Role {
    /// Parse a raw claim string, case-insensitively. Unknown strings yield
    /// `None` and are dropped by the verifier.
    pub fn from_claim(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "ORGANIZER" => Some(Self::Organizer),
            "COMPETITOR" => Some(Self::Competitor),
            "REFEREE" => Some(Self::Referee),
            "COACH" => Some(Self::Coach),
            _ => None,
        }
    }

    /// Whether this role may issue mutating match commands.
    pub fn can_mutate(&self) -> bool {
        matches!(self, Self::Admin | Self::Referee)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Admin => "ADMIN",
            Self::Organizer => "ORGANIZER",
            Self::Competitor => "COMPETITOR",
            Self::Referee => "REFEREE",
            Self::Coach => "COACH",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_parsing() {
        assert_eq!(Role::from_claim("referee"), Some(Role::Referee));
        assert_eq!(Role::from_claim(" ADMIN "), Some(Role::Admin));
        assert_eq!(Role::from_claim("superuser"), None);
        assert_eq!(Role::from_claim(""), None);
    }

    #[test]
    fn mutation_gate() {
        assert!(Role::Admin.can_mutate());
        assert!(Role::Referee.can_mutate());
        assert!(!Role::Organizer.can_mutate());
        assert!(!Role::Competitor.can_mutate());
        assert!(!Role::Coach.can_mutate());
    }
}
