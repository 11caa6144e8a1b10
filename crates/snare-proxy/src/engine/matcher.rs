//! Endpoint resolution by path and method.
//!
//! Literal endpoints are tried first, in declaration order; wildcard
//! endpoints (`/prefix/*`) only when no literal matches. Matching is pure.

use crate::config::{EndpointConfig, ANY_METHOD};
use crate::config::ConfigError;
use crate::engine::rules::CompiledFailureRule;
use hyper::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    /// Literal prefix including its trailing slash
    Prefix(String),
}

impl PathPattern {
    pub fn parse(path: &str) -> Self {
        match path.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => PathPattern::Prefix(prefix.to_string()),
            _ => PathPattern::Exact(path.to_string()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PathPattern::Prefix(_))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSet {
    Any,
    Only(Vec<Method>),
}

impl MethodSet {
    pub fn parse(tokens: &[String]) -> Result<Self, String> {
        if tokens.iter().any(|t| t == ANY_METHOD) {
            return Ok(MethodSet::Any);
        }
        tokens
            .iter()
            .map(|t| parse_method(t))
            .collect::<Result<Vec<_>, _>>()
            .map(MethodSet::Only)
    }

    pub fn allows(&self, method: &Method) -> bool {
        match self {
            MethodSet::Any => true,
            MethodSet::Only(methods) => methods.iter().any(|m| same_method(m, method)),
        }
    }
}

/// Parse a configured verb, normalising to upper case.
pub(crate) fn parse_method(token: &str) -> Result<Method, String> {
    Method::from_bytes(token.to_ascii_uppercase().as_bytes()).map_err(|_| token.to_string())
}

/// Case-insensitive verb comparison.
pub(crate) fn same_method(a: &Method, b: &Method) -> bool {
    a.as_str().eq_ignore_ascii_case(b.as_str())
}

#[derive(Debug)]
pub struct CompiledEndpoint {
    pub index: usize,
    /// Path as written in the configuration
    pub path: String,
    pub pattern: PathPattern,
    pub methods: MethodSet,
    pub debug: bool,
    pub rules: Vec<CompiledFailureRule>,
}

impl CompiledEndpoint {
    pub fn compile(index: usize, config: &EndpointConfig) -> Result<Self, ConfigError> {
        let methods =
            MethodSet::parse(&config.methods).map_err(|method| ConfigError::UnknownMethod {
                endpoint: index,
                path: config.path.clone(),
                method,
            })?;

        let rules = config
            .failure_rules
            .iter()
            .enumerate()
            .map(|(rule_idx, rule)| CompiledFailureRule::compile(index, rule_idx, rule))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            index,
            path: config.path.clone(),
            pattern: PathPattern::parse(&config.path),
            methods,
            debug: config.debug,
            rules,
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.pattern.matches(path) && self.methods.allows(method)
    }
}

/// Resolve `(method, path)` to the most specific endpoint, or `None`.
pub fn match_endpoint<'a>(
    method: &Method,
    path: &str,
    endpoints: &'a [CompiledEndpoint],
) -> Option<&'a CompiledEndpoint> {
    endpoints
        .iter()
        .filter(|e| !e.pattern.is_wildcard())
        .find(|e| e.matches(method, path))
        .or_else(|| {
            endpoints
                .iter()
                .filter(|e| e.pattern.is_wildcard())
                .find(|e| e.matches(method, path))
        })
}
