//! Immutable configuration snapshots and the controller that swaps them.
//!
//! A [`Snapshot`] bundles one configuration generation with its compiled
//! endpoints and its own [`CounterStore`]. Requests take an `Arc<Snapshot>`
//! once and keep it for their whole lifetime, so publishing a new generation
//! never changes the rules or counters under an in-flight request.

use crate::config::{Config, ConfigError, UnmatchedPolicy};
use crate::engine::counters::CounterStore;
use crate::engine::matcher::{match_endpoint, CompiledEndpoint};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    config: Config,
    endpoints: Vec<CompiledEndpoint>,
    counters: CounterStore,
    /// `target.url` + `target.path_prefix`, without a trailing slash
    base_url: String,
    default_headers: HeaderMap,
}

impl Snapshot {
    pub fn compile(config: Config, generation: u64) -> Result<Self, ConfigError> {
        config.validate()?;

        let endpoints = config
            .target
            .endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| CompiledEndpoint::compile(idx, endpoint))
            .collect::<Result<Vec<_>, _>>()?;
        let counters = CounterStore::with_layout(endpoints.iter().map(|e| e.rules.len()));

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.target.headers {
            let invalid = |reason: String| ConfigError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            default_headers.insert(header_name, header_value);
        }

        let base_url = join_base_url(&config.target.url, config.target.path_prefix.as_deref());

        Ok(Self {
            generation,
            config,
            endpoints,
            counters,
            base_url,
            default_headers,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn endpoints(&self) -> &[CompiledEndpoint] {
        &self.endpoints
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub fn unmatched_policy(&self) -> UnmatchedPolicy {
        self.config.target.unmatched
    }

    pub fn override_client_headers(&self) -> bool {
        self.config.target.override_client_headers
    }

    pub fn match_endpoint(&self, method: &Method, path: &str) -> Option<&CompiledEndpoint> {
        match_endpoint(method, path, &self.endpoints)
    }

    /// Backend URL for a request path and optional query string.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = String::with_capacity(self.base_url.len() + path.len() + 16);
        url.push_str(&self.base_url);
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

fn join_base_url(url: &str, prefix: Option<&str>) -> String {
    let mut base = url.trim_end_matches('/').to_string();
    if let Some(prefix) = prefix {
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            base.push('/');
            base.push_str(prefix);
        }
    }
    base
}

/// Holds the active [`Snapshot`] and replaces it atomically.
pub struct ConfigSwap {
    current: RwLock<Arc<Snapshot>>,
}

impl ConfigSwap {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let snapshot = Snapshot::compile(config, 1)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The snapshot new requests should use.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Compile and publish `config` as the next generation.
    ///
    /// The new generation starts with all counters at zero. On error the
    /// active snapshot is left untouched.
    pub fn replace(&self, config: Config) -> Result<Arc<Snapshot>, ConfigError> {
        // Compile outside the lock; the generation is fixed up under it so
        // concurrent replacements still get distinct, increasing numbers.
        let mut snapshot = Snapshot::compile(config, 0)?;
        let mut current = self.current.write();
        snapshot.generation = current.generation + 1;
        let snapshot = Arc::new(snapshot);
        *current = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    /// Load `path` and publish it, keeping the previous generation on failure.
    pub fn reload_from_file(&self, path: &Path) -> Result<Arc<Snapshot>, ConfigError> {
        let result = Config::from_file(path).and_then(|config| {
            let previous = self.current();
            let old = &previous.config().server;
            if old.host != config.server.host || old.port != config.server.port {
                warn!(
                    "Listen address changed in {} to {}:{}; it takes effect after a restart",
                    path.display(),
                    config.server.host,
                    config.server.port
                );
            }
            self.replace(config)
        });

        match &result {
            Ok(snapshot) => {
                crate::metrics::record_config_reload(true, snapshot.generation());
                info!(
                    "Configuration reloaded from {} (generation {}, {} endpoints); rule counters reset",
                    path.display(),
                    snapshot.generation(),
                    snapshot.endpoints().len()
                );
            }
            Err(e) => {
                crate::metrics::record_config_reload(false, self.current().generation());
                warn!(
                    "Rejected configuration reload from {}: {}; keeping generation {}",
                    path.display(),
                    e,
                    self.current().generation()
                );
            }
        }
        result
    }

    /// Zero every counter of the active generation.
    pub fn reset_counters(&self) {
        let snapshot = self.current();
        snapshot.counters().reset_all();
        info!(
            "Rule counters reset for generation {}",
            snapshot.generation()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::counters::RuleId;
    use crate::engine::rules::evaluate;

    fn config(yaml: &str) -> Config {
        Config::from_yaml_str(yaml).unwrap()
    }

    const COUNT_TWO: &str = r#"
target:
  url: http://backend:9000/
  path_prefix: /v1/
  headers:
    X-Env: test
  endpoints:
    - path: /api/users
      methods: ["POST"]
      failure_rules:
        - condition:
            count: 2
          response:
            status_code: 503
"#;

    #[test]
    fn test_upstream_url_composition() {
        let snapshot = Snapshot::compile(config(COUNT_TWO), 1).unwrap();
        assert_eq!(
            snapshot.upstream_url("/api/users", None),
            "http://backend:9000/v1/api/users"
        );
        assert_eq!(
            snapshot.upstream_url("/api/users", Some("page=2&x=y")),
            "http://backend:9000/v1/api/users?page=2&x=y"
        );
        assert_eq!(
            snapshot.upstream_url("/api/users", Some("")),
            "http://backend:9000/v1/api/users"
        );
        assert_eq!(snapshot.default_headers()["x-env"], "test");
    }

    #[test]
    fn test_join_base_url_without_prefix() {
        assert_eq!(join_base_url("http://b:1", None), "http://b:1");
        assert_eq!(join_base_url("http://b:1//", Some("/")), "http://b:1");
    }

    #[test]
    fn test_replace_bumps_generation_and_resets_counters() {
        let swap = ConfigSwap::new(config(COUNT_TWO)).unwrap();
        let first = swap.current();
        assert_eq!(first.generation(), 1);

        let ep = first.match_endpoint(&Method::POST, "/api/users").unwrap();
        assert!(!evaluate(ep, &Method::POST, first.counters()).is_fail());

        let second = swap.replace(config(COUNT_TWO)).unwrap();
        assert_eq!(second.generation(), 2);
        assert_eq!(swap.current().generation(), 2);

        let id = RuleId {
            endpoint: 0,
            rule: 0,
        };
        assert_eq!(second.counters().get(id), 0);
        // old generation is untouched and still usable by whoever holds it
        assert_eq!(first.counters().get(id), 1);

        let ep = second.match_endpoint(&Method::POST, "/api/users").unwrap();
        assert!(!evaluate(ep, &Method::POST, second.counters()).is_fail());
        assert!(evaluate(ep, &Method::POST, second.counters()).is_fail());
    }

    #[test]
    fn test_in_flight_snapshot_keeps_old_rules() {
        let swap = ConfigSwap::new(config(COUNT_TWO)).unwrap();
        let held = swap.current();

        let without_rules = r#"
target:
  url: http://backend:9000
  endpoints:
    - path: /api/users
      methods: ["POST"]
"#;
        swap.replace(config(without_rules)).unwrap();

        let ep = held.match_endpoint(&Method::POST, "/api/users").unwrap();
        assert_eq!(ep.rules.len(), 1);
        assert!(!evaluate(ep, &Method::POST, held.counters()).is_fail());
        assert!(evaluate(ep, &Method::POST, held.counters()).is_fail());

        let fresh = swap.current();
        let ep = fresh.match_endpoint(&Method::POST, "/api/users").unwrap();
        assert!(ep.rules.is_empty());
    }

    #[test]
    fn test_invalid_replacement_keeps_previous() {
        let swap = ConfigSwap::new(config(COUNT_TWO)).unwrap();
        let mut broken = config(COUNT_TWO);
        broken.target.endpoints[0].path = "no-slash".to_string();

        assert!(swap.replace(broken).is_err());
        assert_eq!(swap.current().generation(), 1);
        assert_eq!(swap.current().endpoints()[0].path, "/api/users");
    }

    #[test]
    fn test_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, COUNT_TWO).unwrap();
        let swap = ConfigSwap::new(Config::from_file(&path).unwrap()).unwrap();

        std::fs::write(&path, "target: {url: 'nope'}").unwrap();
        assert!(swap.reload_from_file(&path).is_err());
        assert_eq!(swap.current().generation(), 1);

        std::fs::write(&path, COUNT_TWO.replace("count: 2", "every: 5")).unwrap();
        let snapshot = swap.reload_from_file(&path).unwrap();
        assert_eq!(snapshot.generation(), 2);
    }

    #[test]
    fn test_reset_counters() {
        let swap = ConfigSwap::new(config(COUNT_TWO)).unwrap();
        let snapshot = swap.current();
        let ep = snapshot.match_endpoint(&Method::POST, "/api/users").unwrap();
        evaluate(ep, &Method::POST, snapshot.counters());
        swap.reset_counters();
        assert_eq!(
            snapshot.counters().get(RuleId {
                endpoint: 0,
                rule: 0
            }),
            0
        );
    }
}
