//! Bus message classification.
//!
//! Every message arrives as a routing key plus a JSON body. [`classify`]
//! turns the pair into a [`MessageKind`]; the loop dispatches on it with an
//! exhaustive match.

use mirrorwatch_control::AclRules;
use serde_json::{Map, Value};

/// Routing keys understood by the monitor.
pub mod keys {
    /// Decision-engine classification results.
    pub const DECISION: &str = "mirrorwatch.algos.decider";
    /// Raw controller events.
    pub const CONTROLLER_EVENT: &str = "FAUCET.Event";
    /// Exclude endpoints from investigation.
    pub const IGNORE: &str = "mirrorwatch.action.ignore";
    /// Return ignored endpoints to investigation.
    pub const CLEAR_IGNORED: &str = "mirrorwatch.action.clear.ignored";
    /// Forget endpoints.
    pub const REMOVE: &str = "mirrorwatch.action.remove";
    /// Forget every ignored endpoint.
    pub const REMOVE_IGNORED: &str = "mirrorwatch.action.remove.ignored";
    /// Forget every inactive endpoint.
    pub const REMOVE_INACTIVES: &str = "mirrorwatch.action.remove.inactives";
    /// Push ACL rules to the controller.
    pub const UPDATE_ACLS: &str = "mirrorwatch.action.update_acls";
    /// Change endpoint roles.
    pub const ROLE_CHANGE: &str = "mirrorwatch.action.change";

    /// Every key the monitor subscribes to.
    pub const ALL: [&str; 9] = [
        DECISION,
        CONTROLLER_EVENT,
        IGNORE,
        CLEAR_IGNORED,
        REMOVE,
        REMOVE_IGNORED,
        REMOVE_INACTIVES,
        UPDATE_ACLS,
        ROLE_CHANGE,
    ];
}

/// A classified bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Classification records keyed by endpoint name or hash.
    Decision(Map<String, Value>),
    /// A raw controller event.
    ControllerEvent(Value),
    /// Endpoints to ignore.
    Ignore(Vec<String>),
    /// Endpoints to stop ignoring.
    ClearIgnored(Vec<String>),
    /// Endpoints to forget.
    Remove(Vec<String>),
    /// Forget all ignored endpoints.
    RemoveIgnored,
    /// Forget all inactive endpoints.
    RemoveInactives,
    /// ACL rules per switch.
    UpdateAcls(AclRules),
    /// `(endpoint, role)` pairs.
    RoleChange(Vec<(String, String)>),
    /// A non-empty key the monitor does not handle.
    Unrecognized(String),
}

impl MessageKind {
    /// Short label, used as the metrics dimension.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Decision(_) => "decision",
            Self::ControllerEvent(_) => "controller_event",
            Self::Ignore(_) => "ignore",
            Self::ClearIgnored(_) => "clear_ignored",
            Self::Remove(_) => "remove",
            Self::RemoveIgnored => "remove_ignored",
            Self::RemoveInactives => "remove_inactives",
            Self::UpdateAcls(_) => "update_acls",
            Self::RoleChange(_) => "role_change",
            Self::Unrecognized(_) => "unrecognized",
        }
    }

    /// Whether handling this message can change the registry.
    #[must_use]
    pub const fn mutates_registry(&self) -> bool {
        !matches!(
            self,
            Self::ControllerEvent(_) | Self::UpdateAcls(_) | Self::Unrecognized(_)
        )
    }
}

/// Classify a bus message.
///
/// Returns `None` exactly when the routing key is absent or empty. A known
/// key with a body of the wrong shape yields an empty payload.
#[must_use]
pub fn classify(routing_key: Option<&str>, body: &str) -> Option<MessageKind> {
    let key = routing_key.filter(|k| !k.is_empty())?;
    let payload: Value = serde_json::from_str(body).unwrap_or_else(|e| {
        tracing::warn!(routing_key = %key, error = %e, "Message body is not JSON");
        Value::Null
    });

    let kind = match key {
        keys::DECISION => MessageKind::Decision(match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        }),
        keys::CONTROLLER_EVENT => MessageKind::ControllerEvent(payload),
        keys::IGNORE => MessageKind::Ignore(targets(&payload)),
        keys::CLEAR_IGNORED => MessageKind::ClearIgnored(targets(&payload)),
        keys::REMOVE => MessageKind::Remove(targets(&payload)),
        keys::REMOVE_IGNORED => MessageKind::RemoveIgnored,
        keys::REMOVE_INACTIVES => MessageKind::RemoveInactives,
        keys::UPDATE_ACLS => MessageKind::UpdateAcls(acl_rules(payload)),
        keys::ROLE_CHANGE => MessageKind::RoleChange(role_changes(&payload)),
        other => MessageKind::Unrecognized(other.to_string()),
    };
    Some(kind)
}

fn targets(payload: &Value) -> Vec<String> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn acl_rules(payload: Value) -> AclRules {
    let Value::Object(map) = payload else {
        return AclRules::new();
    };
    map.into_iter()
        .filter_map(|(switch, rules)| match rules {
            Value::Array(list) => Some((switch, list)),
            _ => None,
        })
        .collect()
}

fn role_changes(payload: &Value) -> Vec<(String, String)> {
    let Value::Array(items) = payload else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(name), Value::String(role)]) => Some((name.clone(), role.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_or_empty_key_is_invalid() {
        assert_eq!(classify(None, r#"{"Key1": "Val1"}"#), None);
        assert_eq!(classify(Some(""), r#"{"Key1": "Val1"}"#), None);
    }

    #[test]
    fn unknown_key_is_valid_but_unrecognized() {
        assert_eq!(
            classify(Some("foo"), "{}"),
            Some(MessageKind::Unrecognized("foo".into()))
        );
    }

    #[test]
    fn decision_and_event() {
        let body = r#"{"Key1": "Val1"}"#;
        let Some(MessageKind::Decision(map)) = classify(Some(keys::DECISION), body) else {
            panic!("expected decision");
        };
        assert_eq!(map.get("Key1"), Some(&json!("Val1")));

        assert_eq!(
            classify(Some(keys::CONTROLLER_EVENT), body),
            Some(MessageKind::ControllerEvent(json!({"Key1": "Val1"})))
        );

        assert_eq!(
            classify(Some(keys::DECISION), "[1, 2]"),
            Some(MessageKind::Decision(Map::new()))
        );
    }

    #[test]
    fn target_lists() {
        assert_eq!(
            classify(Some(keys::IGNORE), r#"["foo", "bar"]"#),
            Some(MessageKind::Ignore(vec!["foo".into(), "bar".into()]))
        );
        assert_eq!(
            classify(Some(keys::CLEAR_IGNORED), r#"{"foo": "bar"}"#),
            Some(MessageKind::ClearIgnored(vec!["foo".into()]))
        );
        assert_eq!(
            classify(Some(keys::REMOVE), "\"foo\""),
            Some(MessageKind::Remove(Vec::new()))
        );
        assert_eq!(
            classify(Some(keys::REMOVE_IGNORED), "garbage"),
            Some(MessageKind::RemoveIgnored)
        );
        assert_eq!(
            classify(Some(keys::REMOVE_INACTIVES), "{}"),
            Some(MessageKind::RemoveInactives)
        );
    }

    #[test]
    fn role_changes_and_acls() {
        let body = r#"[["foo", "printer"], ["bar"], "baz", ["qux", "server"]]"#;
        assert_eq!(
            classify(Some(keys::ROLE_CHANGE), body),
            Some(MessageKind::RoleChange(vec![
                ("foo".into(), "printer".into()),
                ("qux".into(), "server".into()),
            ]))
        );

        let body = r#"{"sw1": [{"rule": {"actions": {"allow": 1}}}], "sw2": "bad"}"#;
        let Some(MessageKind::UpdateAcls(rules)) = classify(Some(keys::UPDATE_ACLS), body) else {
            panic!("expected acls");
        };
        assert_eq!(rules.len(), 1);
        assert_eq!(rules["sw1"].len(), 1);
    }

    #[test]
    fn labels_and_mutation() {
        assert_eq!(MessageKind::RemoveIgnored.label(), "remove_ignored");
        assert!(MessageKind::Ignore(Vec::new()).mutates_registry());
        assert!(!MessageKind::UpdateAcls(AclRules::new()).mutates_registry());
        assert_eq!(keys::ALL.len(), 9);
    }
}
