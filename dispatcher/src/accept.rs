//! Routing predicates deciding which queue claims a key.

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Function form of an accepter.
pub type AcceptFn = Arc<dyn Fn(&str) -> Acceptance + Send + Sync>;

/// Verdict of an accepter for one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acceptance {
    Reject,
    /// Claim the key unchanged.
    Accept,
    /// Claim the key but store the replacement instead, e.g. with a prefix
    /// trimmed off. An empty replacement rejects the key.
    Rewrite(String),
}

impl From<bool> for Acceptance {
    fn from(accepted: bool) -> Self {
        if accepted {
            Acceptance::Accept
        } else {
            Acceptance::Reject
        }
    }
}

/// Declarative accepter rule, the config-file counterpart of
/// [`Accepter::func`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptRule {
    /// Accept every key unchanged.
    Any,
    /// Accept keys starting with `value`, optionally stripping it.
    Prefix {
        value: String,
        #[serde(default)]
        strip: bool,
    },
    /// Accept keys ending with `value`, optionally stripping it.
    Suffix {
        value: String,
        #[serde(default)]
        strip: bool,
    },
}

impl AcceptRule {
    fn apply(&self, key: &str) -> Acceptance {
        match self {
            AcceptRule::Any => Acceptance::Accept,
            AcceptRule::Prefix { value, strip } => match key.strip_prefix(value.as_str()) {
                Some(rest) if *strip => Acceptance::Rewrite(rest.to_string()),
                Some(_) => Acceptance::Accept,
                None => Acceptance::Reject,
            },
            AcceptRule::Suffix { value, strip } => match key.strip_suffix(value.as_str()) {
                Some(rest) if *strip => Acceptance::Rewrite(rest.to_string()),
                Some(_) => Acceptance::Accept,
                None => Acceptance::Reject,
            },
        }
    }
}

/// A queue's routing predicate, either an arbitrary function or a
/// declarative rule.
#[derive(Clone)]
pub enum Accepter {
    Func(AcceptFn),
    Rule(AcceptRule),
}

impl Accepter {
    pub fn func(f: impl Fn(&str) -> Acceptance + Send + Sync + 'static) -> Self {
        Accepter::Func(Arc::new(f))
    }

    /// The default predicate of lazily created forced queues.
    pub fn accept_all() -> Self {
        Accepter::Rule(AcceptRule::Any)
    }

    /// Tests a key. `None` rejects it; `Some` carries the key to store,
    /// which differs from the input when the accepter rewrote it.
    pub fn test(&self, key: &str) -> Option<String> {
        let acceptance = match self {
            Accepter::Func(f) => f(key),
            Accepter::Rule(rule) => rule.apply(key),
        };

        match acceptance {
            Acceptance::Reject => None,
            Acceptance::Accept => Some(key.to_string()),
            Acceptance::Rewrite(replacement) if replacement.is_empty() => None,
            Acceptance::Rewrite(replacement) => Some(replacement),
        }
    }
}

impl fmt::Debug for Accepter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accepter::Func(_) => f.write_str("Accepter::Func"),
            Accepter::Rule(rule) => write!(f, "Accepter::Rule({rule:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn func_accept_and_reject() {
        let accepter = Accepter::func(|key| Acceptance::from(key.starts_with("crispr")));

        assert_eq!(accepter.test("crispr:abc"), Some("crispr:abc".to_string()));
        assert_eq!(accepter.test("other"), None);
    }

    #[test]
    fn func_rewrite_replaces_key() {
        let accepter = Accepter::func(|key| Acceptance::Rewrite(key.to_uppercase()));

        assert_eq!(accepter.test("foo"), Some("FOO".to_string()));
    }

    #[test]
    fn empty_rewrite_rejects() {
        let accepter = Accepter::func(|_| Acceptance::Rewrite(String::new()));

        assert_eq!(accepter.test("foo"), None);
    }

    #[test]
    fn prefix_rule_strips() {
        let rule = AcceptRule::Prefix {
            value: "id:".to_string(),
            strip: true,
        };
        let accepter = Accepter::Rule(rule);

        assert_eq!(accepter.test("id:42"), Some("42".to_string()));
        assert_eq!(accepter.test("name:42"), None);
        // Stripping the whole key leaves nothing to look up.
        assert_eq!(accepter.test("id:"), None);
    }

    #[test]
    fn suffix_rule_without_strip_keeps_key() {
        let rule = AcceptRule::Suffix {
            value: "@db1".to_string(),
            strip: false,
        };
        let accepter = Accepter::Rule(rule);

        assert_eq!(accepter.test("k1@db1"), Some("k1@db1".to_string()));
        assert_eq!(accepter.test("k1@db2"), None);
    }

    #[test]
    fn rule_deserializes_from_yaml() {
        let rule: AcceptRule =
            serde_yaml::from_str("{ type: prefix, value: \"id:\", strip: true }").unwrap();
        assert_eq!(
            rule,
            AcceptRule::Prefix {
                value: "id:".to_string(),
                strip: true,
            }
        );

        let rule: AcceptRule = serde_yaml::from_str("{ type: any }").unwrap();
        assert_eq!(rule, AcceptRule::Any);
    }
}
