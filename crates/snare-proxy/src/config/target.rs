//! Backend target, endpoint, and failure rule configuration.

use super::error::ConfigError;
use super::protocol::Protocol;
use hyper::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP verbs accepted in `methods` and `condition.method`.
pub const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// Method token that matches every verb.
pub const ANY_METHOD: &str = "*";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Backend base URL, e.g. `http://localhost:9000`
    pub url: String,
    /// Inserted between the base URL and the request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Headers added to every forwarded request (`${VAR}` is expanded at load)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// When true, configured headers replace caller headers of the same name
    #[serde(default = "default_override_client_headers")]
    pub override_client_headers: bool,
    /// What to do with requests that match no endpoint
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

fn default_override_client_headers() -> bool {
    true
}

/// Handling of requests that match no configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Answer 404 without contacting the backend
    #[default]
    Reject,
    /// Forward unmodified to the backend
    Forward,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Literal path, or a prefix ending in `/*`
    pub path: String,
    /// Allowed verbs; `*` allows any
    pub methods: Vec<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_rules: Vec<FailureRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FailureRuleConfig {
    #[serde(default)]
    pub condition: ConditionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<FailureResponseConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConditionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Restrict the rule to one verb
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Fire once, on the n-th considered request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Fire on every n-th considered request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u64>,
    /// Fire with this chance per considered request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    /// Milliseconds to wait before failing or forwarding
    #[serde(default, alias = "delay_ms", skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: None,
            count: None,
            every: None,
            probability: None,
            delay: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FailureResponseConfig {
    #[serde(alias = "status")]
    pub status_code: u16,
    /// Structured bodies are sent as JSON, strings as plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl TargetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Protocol::from_url(&self.url).is_none() {
            return Err(ConfigError::InvalidTarget {
                url: self.url.clone(),
                reason: "expected http:// or https:// followed by a host".to_string(),
            });
        }

        if let Some(prefix) = &self.path_prefix {
            if !prefix.is_empty() && !prefix.starts_with('/') {
                return Err(ConfigError::InvalidTarget {
                    url: self.url.clone(),
                    reason: format!("path_prefix '{prefix}' must start with '/'"),
                });
            }
        }

        validate_headers(&self.headers)?;

        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            endpoint.validate(idx)?;
        }
        Ok(())
    }
}

impl EndpointConfig {
    fn validate(&self, idx: usize) -> Result<(), ConfigError> {
        validate_path(&self.path).map_err(|reason| ConfigError::InvalidPath {
            endpoint: idx,
            path: self.path.clone(),
            reason,
        })?;

        if self.methods.is_empty() {
            return Err(ConfigError::NoMethods {
                endpoint: idx,
                path: self.path.clone(),
            });
        }
        for method in &self.methods {
            if !is_known_method(method) {
                return Err(ConfigError::UnknownMethod {
                    endpoint: idx,
                    path: self.path.clone(),
                    method: method.clone(),
                });
            }
        }

        for (rule_idx, rule) in self.failure_rules.iter().enumerate() {
            rule.validate().map_err(|problem| match problem {
                RuleProblem::Conflict(triggers) => ConfigError::ConflictingTriggers {
                    endpoint: idx,
                    rule: rule_idx,
                    triggers,
                },
                RuleProblem::Invalid(reason) => ConfigError::InvalidRule {
                    endpoint: idx,
                    rule: rule_idx,
                    reason,
                },
            })?;
        }
        Ok(())
    }
}

enum RuleProblem {
    Conflict(Vec<&'static str>),
    Invalid(String),
}

impl FailureRuleConfig {
    /// Names of the trigger fields that are set.
    pub fn triggers(&self) -> Vec<&'static str> {
        let c = &self.condition;
        let mut set = Vec::new();
        if c.count.is_some() {
            set.push("count");
        }
        if c.every.is_some() {
            set.push("every");
        }
        if c.probability.is_some() {
            set.push("probability");
        }
        set
    }

    fn validate(&self) -> Result<(), RuleProblem> {
        let c = &self.condition;
        let triggers = self.triggers();
        if triggers.len() > 1 {
            return Err(RuleProblem::Conflict(triggers));
        }

        if let Some(method) = &c.method {
            if !is_known_method(method) {
                return Err(RuleProblem::Invalid(format!("unknown method '{method}'")));
            }
        }
        if c.count == Some(0) {
            return Err(RuleProblem::Invalid("count must be positive".to_string()));
        }
        if c.every == Some(0) {
            return Err(RuleProblem::Invalid("every must be positive".to_string()));
        }
        if let Some(p) = c.probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(RuleProblem::Invalid(format!(
                    "probability {p} is outside [0, 1]"
                )));
            }
        }

        match (triggers.is_empty(), c.delay.is_some(), self.response.is_some()) {
            // pure delay
            (true, true, false) => {}
            (true, _, true) => {
                return Err(RuleProblem::Invalid(
                    "a response requires a count, every, or probability trigger".to_string(),
                ))
            }
            (true, false, false) => {
                return Err(RuleProblem::Invalid(
                    "rule has neither a trigger nor a delay".to_string(),
                ))
            }
            (false, false, false) => {
                return Err(RuleProblem::Invalid(
                    "triggered rule needs a response, a delay, or both".to_string(),
                ))
            }
            (false, _, _) => {}
        }

        if let Some(response) = &self.response {
            if !(100..=599).contains(&response.status_code) {
                return Err(RuleProblem::Invalid(format!(
                    "status_code {} is not a valid HTTP status",
                    response.status_code
                )));
            }
            validate_headers(&response.headers).map_err(|e| RuleProblem::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}

fn is_known_method(token: &str) -> bool {
    token == ANY_METHOD || KNOWN_METHODS.iter().any(|m| m.eq_ignore_ascii_case(token))
}

/// Literal paths must start with `/`; the only wildcard form is a trailing `/*`.
fn validate_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("path must start with '/'");
    }
    if let Some(pos) = path.find('*') {
        if pos != path.len() - 1 || !path.ends_with("/*") {
            return Err("'*' is only allowed as a trailing '/*' segment");
        }
    }
    Ok(())
}

fn validate_headers(headers: &HashMap<String, String>) -> Result<(), ConfigError> {
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(path: &str, methods: &[&str], rules: Vec<FailureRuleConfig>) -> EndpointConfig {
        EndpointConfig {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            debug: false,
            failure_rules: rules,
        }
    }

    fn target(endpoints: Vec<EndpointConfig>) -> TargetConfig {
        TargetConfig {
            url: "http://localhost:9000".to_string(),
            path_prefix: None,
            headers: HashMap::new(),
            override_client_headers: true,
            unmatched: UnmatchedPolicy::Reject,
            endpoints,
        }
    }

    fn rule(condition: ConditionConfig, status: Option<u16>) -> FailureRuleConfig {
        FailureRuleConfig {
            condition,
            response: status.map(|status_code| FailureResponseConfig {
                status_code,
                body: None,
                headers: HashMap::new(),
            }),
        }
    }

    #[test]
    fn test_valid_paths() {
        assert!(validate_path("/api/users").is_ok());
        assert!(validate_path("/api/*").is_ok());
        assert!(validate_path("/*").is_ok());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(validate_path("api/users").is_err());
        assert!(validate_path("/api/*/users").is_err());
        assert!(validate_path("/api*").is_err());
        assert!(validate_path("/api/**").is_err());
    }

    #[test]
    fn test_conflicting_triggers_rejected() {
        let cond = ConditionConfig {
            count: Some(3),
            every: Some(5),
            ..Default::default()
        };
        let err = target(vec![endpoint("/a", &["GET"], vec![rule(cond, Some(503))])])
            .validate()
            .unwrap_err();
        match err {
            ConfigError::ConflictingTriggers {
                endpoint,
                rule,
                triggers,
            } => {
                assert_eq!((endpoint, rule), (0, 0));
                assert_eq!(triggers, vec!["count", "every"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pure_delay_rule_accepted() {
        let cond = ConditionConfig {
            delay: Some(250),
            ..Default::default()
        };
        assert!(target(vec![endpoint("/a", &["*"], vec![rule(cond, None)])])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_triggerless_rule_with_response_rejected() {
        let cond = ConditionConfig {
            delay: Some(250),
            ..Default::default()
        };
        let err = target(vec![endpoint("/a", &["GET"], vec![rule(cond, Some(500))])])
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn test_empty_rule_rejected() {
        let err = target(vec![endpoint(
            "/a",
            &["GET"],
            vec![rule(ConditionConfig::default(), None)],
        )])
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("neither a trigger nor a delay"));
    }

    #[test]
    fn test_zero_count_and_bad_probability_rejected() {
        for cond in [
            ConditionConfig {
                count: Some(0),
                ..Default::default()
            },
            ConditionConfig {
                every: Some(0),
                ..Default::default()
            },
            ConditionConfig {
                probability: Some(1.5),
                ..Default::default()
            },
        ] {
            let result =
                target(vec![endpoint("/a", &["GET"], vec![rule(cond, Some(500))])]).validate();
            assert!(matches!(result, Err(ConfigError::InvalidRule { .. })));
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = target(vec![endpoint("/a", &["FETCH"], vec![])])
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMethod { .. }));

        let cond = ConditionConfig {
            method: Some("YANK".to_string()),
            count: Some(1),
            ..Default::default()
        };
        let err = target(vec![endpoint("/a", &["GET"], vec![rule(cond, Some(500))])])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("YANK"));
    }

    #[test]
    fn test_lowercase_methods_accepted() {
        assert!(target(vec![endpoint("/a", &["get", "Post"], vec![])])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_invalid_status_rejected() {
        let cond = ConditionConfig {
            every: Some(2),
            ..Default::default()
        };
        let err = target(vec![endpoint("/a", &["GET"], vec![rule(cond, Some(42))])])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("status_code 42"));
    }

    #[test]
    fn test_invalid_target_url_rejected() {
        let mut t = target(vec![]);
        t.url = "localhost:9000".to_string();
        assert!(matches!(
            t.validate(),
            Err(ConfigError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_invalid_default_header_rejected() {
        let mut t = target(vec![]);
        t.headers
            .insert("bad header".to_string(), "value".to_string());
        assert!(matches!(
            t.validate(),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }
}
