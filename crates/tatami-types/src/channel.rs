//! Fan-out channel identifiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a channel string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid channel: {0}")]
pub struct ChannelParseError(pub String);

/// Logical fan-out topic.
///
/// Two forms exist on the wire and on the pub/sub bus:
/// `match:{matchId}` and `tournament:{tournamentId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelId {
    Match(String),
    Tournament(String),
}

impl ChannelId {
    pub fn for_match(match_id: impl Into<String>) -> Self {
        Self::Match(match_id.into())
    }

    pub fn for_tournament(tournament_id: impl Into<String>) -> Self {
        Self::Tournament(tournament_id.into())
    }

    /// Parse a `kind:id` channel string.
    pub fn parse(s: &str) -> Result<Self, ChannelParseError> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ChannelParseError(s.to_string()))?;
        if id.is_empty() {
            return Err(ChannelParseError(s.to_string()));
        }
        match kind {
            "match" => Ok(Self::Match(id.to_string())),
            "tournament" => Ok(Self::Tournament(id.to_string())),
            _ => Err(ChannelParseError(s.to_string())),
        }
    }

    pub fn match_id(&self) -> Option<&str> {
        match self {
            Self::Match(id) => Some(id),
            Self::Tournament(_) => None,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Match(id) => write!(f, "match:{id}"),
            Self::Tournament(id) => write!(f, "tournament:{id}"),
        }
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ChannelParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ChannelId> for String {
    fn from(c: ChannelId) -> Self {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let c = ChannelId::parse("match:m-42").unwrap();
        assert_eq!(c, ChannelId::for_match("m-42"));
        assert_eq!(c.to_string(), "match:m-42");

        let t = ChannelId::parse("tournament:t-1").unwrap();
        assert_eq!(t.to_string(), "tournament:t-1");
        assert_eq!(t.match_id(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(ChannelId::parse("match").is_err());
        assert!(ChannelId::parse("match:").is_err());
        assert!(ChannelId::parse("ticker:ETH").is_err());
    }
}
