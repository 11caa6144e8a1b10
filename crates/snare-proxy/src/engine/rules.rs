//! Failure rules and their evaluation.
//!
//! Rules of an endpoint are scanned in declaration order. The first enabled,
//! method-matching rule whose trigger fires decides what happens to the
//! request; later rules are not looked at.

use crate::config::{ConfigError, FailureResponseConfig, FailureRuleConfig};
use crate::engine::counters::{CounterStore, RuleId};
use crate::engine::matcher::{parse_method, same_method, CompiledEndpoint};
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// One-shot: fires when the counter reaches exactly n
    Count(u64),
    /// Periodic: fires on every multiple of n
    Every(u64),
    /// Fires when a uniform draw in [0, 1) is below p
    Probability(f64),
    /// Always applies its delay, never fails
    DelayOnly,
}

/// Canned response returned by a firing rule.
#[derive(Debug, Clone)]
pub struct FailureResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FailureResponse {
    fn compile(config: &FailureResponseConfig) -> Result<Self, String> {
        let status = StatusCode::from_u16(config.status_code).map_err(|e| e.to_string())?;

        let (body, default_type) = match &config.body {
            None => (Bytes::from_static(b"{}"), "application/json"),
            Some(serde_json::Value::String(text)) => {
                (Bytes::from(text.clone()), "text/plain; charset=utf-8")
            }
            Some(value) => (
                Bytes::from(serde_json::to_vec(value).map_err(|e| e.to_string())?),
                "application/json",
            ),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
            let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
            headers.insert(name, value);
        }
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(default_type));
        }

        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFailureRule {
    pub id: RuleId,
    pub enabled: bool,
    pub method: Option<Method>,
    pub trigger: Trigger,
    pub delay: Option<Duration>,
    pub response: Option<FailureResponse>,
}

impl CompiledFailureRule {
    pub fn compile(
        endpoint: usize,
        rule: usize,
        config: &FailureRuleConfig,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            endpoint,
            rule,
            reason,
        };
        let c = &config.condition;

        let trigger = match (c.count, c.every, c.probability) {
            (Some(n), None, None) => Trigger::Count(n),
            (None, Some(n), None) => Trigger::Every(n),
            (None, None, Some(p)) => Trigger::Probability(p),
            (None, None, None) => Trigger::DelayOnly,
            _ => {
                return Err(ConfigError::ConflictingTriggers {
                    endpoint,
                    rule,
                    triggers: config.triggers(),
                })
            }
        };

        let method = match c.method.as_deref() {
            None | Some("*") => None,
            Some(token) => {
                Some(parse_method(token).map_err(|m| invalid(format!("unknown method '{m}'")))?)
            }
        };

        let response = config
            .response
            .as_ref()
            .map(FailureResponse::compile)
            .transpose()
            .map_err(invalid)?;

        Ok(Self {
            id: RuleId { endpoint, rule },
            enabled: c.enabled,
            method,
            trigger,
            delay: c.delay.map(Duration::from_millis),
            response,
        })
    }

    fn applies_to(&self, method: &Method) -> bool {
        self.enabled
            && self
                .method
                .as_ref()
                .map_or(true, |wanted| same_method(wanted, method))
    }

    /// Decide whether the trigger fires for the `n`-th considered request.
    fn fires(&self, n: u64, rng: &mut impl Rng) -> bool {
        match self.trigger {
            Trigger::Count(target) => n == target,
            Trigger::Every(period) => n % period == 0,
            Trigger::Probability(p) => rng.gen::<f64>() < p,
            Trigger::DelayOnly => true,
        }
    }
}

/// What the proxy does with a request.
#[derive(Debug, Clone, Copy)]
pub enum Disposition<'a> {
    Forward,
    ForwardAfterDelay {
        delay: Duration,
        rule: RuleId,
    },
    /// Wait for `delay` (if any), then answer with `response`
    Fail {
        delay: Option<Duration>,
        response: &'a FailureResponse,
        rule: RuleId,
    },
}

impl Disposition<'_> {
    pub fn is_fail(&self) -> bool {
        matches!(self, Disposition::Fail { .. })
    }
}

pub fn evaluate<'a>(
    endpoint: &'a CompiledEndpoint,
    method: &Method,
    counters: &CounterStore,
) -> Disposition<'a> {
    evaluate_with_rng(endpoint, method, counters, &mut rand::thread_rng())
}

pub fn evaluate_with_rng<'a>(
    endpoint: &'a CompiledEndpoint,
    method: &Method,
    counters: &CounterStore,
    rng: &mut impl Rng,
) -> Disposition<'a> {
    for rule in &endpoint.rules {
        if !rule.applies_to(method) {
            continue;
        }

        let n = counters.increment(rule.id);
        if !rule.fires(n, rng) {
            continue;
        }

        match (&rule.response, rule.delay) {
            (Some(response), delay) => {
                return Disposition::Fail {
                    delay,
                    response,
                    rule: rule.id,
                }
            }
            (None, Some(delay)) => {
                return Disposition::ForwardAfterDelay {
                    delay,
                    rule: rule.id,
                }
            }
            // rejected at load time; treat as inert
            (None, None) => continue,
        }
    }
    Disposition::Forward
}
