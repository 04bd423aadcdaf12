//! Operator query grammar.
//!
//! A query is `"<dimension> <value>"` over the dimensions `all`, `state`,
//! `os`, `role` and `behavior`. Values compare case-insensitively, with
//! spaces, underscores and hyphens treated alike, so `role developer-workstation`
//! matches a label of `Developer Workstation`.

use std::fmt;
use std::str::FromStr;

use mirrorwatch_store::{Endpoint, EndpointState};

use crate::error::ControlError;
use crate::lifecycle;

/// Which states a `state` filter selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    /// Queued, mirroring, or known.
    Active,
    /// Exactly one state.
    Is(EndpointState),
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every endpoint.
    All,
    /// Endpoints by lifecycle state.
    State(StateFilter),
    /// Endpoints by latest detected operating system.
    Os(String),
    /// Endpoints by role, or by top classifier label when no role is set.
    Role(String),
    /// Endpoints by latest behavior verdict.
    Behavior(String),
}

fn normalize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

impl Filter {
    /// Returns true if `endpoint` satisfies the filter.
    #[must_use]
    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        match self {
            Self::All => true,
            Self::State(StateFilter::Active) => lifecycle::is_active(endpoint.state),
            Self::State(StateFilter::Is(state)) => endpoint.state == *state,
            Self::Os(os) => endpoint.latest_os().is_some_and(|v| normalize(v) == *os),
            Self::Role(role) => role_of(endpoint).is_some_and(|v| normalize(&v) == *role),
            Self::Behavior(behavior) => endpoint
                .latest_snapshot()
                .is_some_and(|s| normalize(&s.behavior) == *behavior),
        }
    }
}

/// The role an endpoint is reported under.
#[must_use]
pub fn role_of(endpoint: &Endpoint) -> Option<String> {
    endpoint.data.role.clone().or_else(|| {
        endpoint
            .latest_snapshot()
            .and_then(|s| s.labels.first().cloned())
    })
}

impl FromStr for Filter {
    type Err = ControlError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let (dimension, value) = expr
            .split_once(char::is_whitespace)
            .map_or((expr, ""), |(d, v)| (d, v.trim()));

        let require_value = || {
            if value.is_empty() {
                Err(ControlError::InvalidQuery(format!(
                    "dimension '{dimension}' needs a value"
                )))
            } else {
                Ok(normalize(value))
            }
        };

        match dimension.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "state" => {
                let value = require_value()?;
                if value == "active" {
                    return Ok(Self::State(StateFilter::Active));
                }
                value
                    .parse::<EndpointState>()
                    .map(|s| Self::State(StateFilter::Is(s)))
                    .map_err(ControlError::InvalidQuery)
            }
            "os" => require_value().map(Self::Os),
            "role" => require_value().map(Self::Role),
            "behavior" => require_value().map(Self::Behavior),
            other => Err(ControlError::InvalidQuery(format!(
                "unknown dimension '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::State(StateFilter::Active) => f.write_str("state active"),
            Self::State(StateFilter::Is(state)) => write!(f, "state {state}"),
            Self::Os(v) => write!(f, "os {v}"),
            Self::Role(v) => write!(f, "role {v}"),
            Self::Behavior(v) => write!(f, "behavior {v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimensions() {
        assert_eq!("all".parse::<Filter>().unwrap(), Filter::All);
        assert_eq!(
            "state active".parse::<Filter>().unwrap(),
            Filter::State(StateFilter::Active)
        );
        assert_eq!(
            "state  Ignored".parse::<Filter>().unwrap(),
            Filter::State(StateFilter::Is(EndpointState::Ignored))
        );
        assert_eq!(
            "role Developer Workstation".parse::<Filter>().unwrap(),
            Filter::Role("developer-workstation".to_string())
        );
        assert_eq!(
            "os windows".parse::<Filter>().unwrap(),
            Filter::Os("windows".to_string())
        );
    }

    #[test]
    fn rejects_bad_queries() {
        assert!(matches!(
            "colour blue".parse::<Filter>(),
            Err(ControlError::InvalidQuery(_))
        ));
        assert!(matches!(
            "state sleeping".parse::<Filter>(),
            Err(ControlError::InvalidQuery(_))
        ));
        assert!(matches!(
            "role".parse::<Filter>(),
            Err(ControlError::InvalidQuery(_))
        ));
    }

    #[test]
    fn display_roundtrips() {
        for expr in ["all", "state active", "state known", "os windows", "behavior normal"] {
            let filter: Filter = expr.parse().unwrap();
            assert_eq!(filter.to_string(), expr);
        }
    }
}
