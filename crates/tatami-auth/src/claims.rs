//! Raw claim shapes and the verified-token view.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tatami_types::Role;

/// One role string or a list of them; identity providers emit both shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn as_strings(&self) -> Vec<&str> {
        match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MetadataClaims {
    #[serde(default)]
    pub roles: Option<OneOrMany>,
    #[serde(default)]
    pub role: Option<String>,
}

/// The claim surface the verifier reads. Anything else in the token is
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawClaims {
    pub sub: String,
    #[serde(default)]
    pub iat: Option<i64>,
    pub exp: i64,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub user_roles: Option<Vec<String>>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub app_metadata: Option<MetadataClaims>,
    #[serde(default)]
    pub user_metadata: Option<MetadataClaims>,
}

impl RawClaims {
    /// First present, non-empty role source wins; unknown strings are
    /// dropped afterwards, so a source full of garbage yields an empty set
    /// rather than falling through.
    pub fn extract_roles(&self) -> Vec<Role> {
        let raw: Vec<&str> = if let Some(rs) = self.user_roles.as_ref().filter(|v| !v.is_empty()) {
            rs.iter().map(String::as_str).collect()
        } else if let Some(r) = self.user_role.as_deref() {
            vec![r]
        } else if let Some(rs) = self
            .app_metadata
            .as_ref()
            .and_then(|m| m.roles.as_ref())
        {
            rs.as_strings()
        } else if let Some(r) = self.app_metadata.as_ref().and_then(|m| m.role.as_deref()) {
            vec![r]
        } else if let Some(r) = self.user_metadata.as_ref().and_then(|m| m.role.as_deref()) {
            vec![r]
        } else {
            Vec::new()
        };

        let mut roles = Vec::new();
        for s in raw {
            if let Some(role) = Role::from_claim(s) {
                if !roles.contains(&role) {
                    roles.push(role);
                }
            }
        }
        roles
    }
}

/// The authenticated view of a token, handed to the hub at upgrade time.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub subject_id: String,
    pub roles: Vec<Role>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedToken {
    /// Whether this subject may issue mutating match commands.
    pub fn can_mutate(&self) -> bool {
        self.roles.iter().any(Role::can_mutate)
    }
}
