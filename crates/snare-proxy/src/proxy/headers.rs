//! Snare marker headers and hop-by-hop header handling.
//!
//! Static header names avoid runtime `.parse().unwrap()` calls at the call
//! sites; cloning a `from_static` header is just a pointer copy.

use hyper::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use hyper::HeaderMap;

// Static header names for Snare marker headers
pub static X_SNARE_FAULT: HeaderName = HeaderName::from_static("x-snare-fault");
pub static X_SNARE_ENDPOINT: HeaderName = HeaderName::from_static("x-snare-endpoint");
pub static X_SNARE_RULE: HeaderName = HeaderName::from_static("x-snare-rule");
pub static X_SNARE_DELAY_MS: HeaderName = HeaderName::from_static("x-snare-delay-ms");
pub static X_SNARE_PROXIED: HeaderName = HeaderName::from_static("x-snare-proxied");

pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");
pub static VALUE_ERROR: HeaderValue = HeaderValue::from_static("error");

static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Extension trait for inserting Snare headers.
pub trait SnareHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Insert a dynamic value. Returns false if it is not a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl SnareHeadersExt for HeaderMap {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}

/// Remove connection-scoped headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in [
        &CONNECTION,
        &KEEP_ALIVE,
        &PROXY_AUTHENTICATE,
        &PROXY_AUTHORIZATION,
        &TE,
        &TRAILER,
        &TRANSFER_ENCODING,
        &UPGRADE,
    ] {
        headers.remove(name);
    }
}

/// Headers for the outbound request.
///
/// Caller headers minus `Host`, `Content-Length` and hop-by-hop headers, merged
/// with the configured defaults. With `override_client` the defaults replace
/// caller values of the same name; otherwise they only fill gaps.
pub fn build_upstream_headers(
    caller: &HeaderMap,
    defaults: &HeaderMap,
    override_client: bool,
) -> HeaderMap {
    let mut headers = caller.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);

    for (name, value) in defaults {
        if override_client || !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(*k, HeaderValue::from_static(*v));
        }
        headers
    }

    #[test]
    fn test_static_header_names() {
        assert_eq!(X_SNARE_FAULT.as_str(), "x-snare-fault");
        assert_eq!(X_SNARE_PROXIED.as_str(), "x-snare-proxied");
    }

    #[test]
    fn test_set_header_value_invalid() {
        let mut headers = HeaderMap::new();
        assert!(headers.set_header_value(&X_SNARE_RULE, "0.1"));
        assert!(!headers.set_header_value(&X_SNARE_RULE, "bad\nvalue"));
        assert_eq!(headers[&X_SNARE_RULE], "0.1");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = map(&[
            ("connection", "keep-alive, x-session-hop"),
            ("keep-alive", "timeout=5"),
            ("x-session-hop", "1"),
            ("transfer-encoding", "chunked"),
            ("content-type", "application/json"),
        ]);
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["content-type"], "application/json");
    }

    #[test]
    fn test_defaults_override_caller() {
        let caller = map(&[
            ("host", "proxy.local"),
            ("authorization", "Bearer caller"),
            ("content-length", "12"),
            ("accept", "*/*"),
        ]);
        let defaults = map(&[("authorization", "Bearer configured"), ("x-env", "qa")]);

        let merged = build_upstream_headers(&caller, &defaults, true);
        assert_eq!(merged["authorization"], "Bearer configured");
        assert_eq!(merged["x-env"], "qa");
        assert_eq!(merged["accept"], "*/*");
        assert!(merged.get("host").is_none());
        assert!(merged.get("content-length").is_none());
    }

    #[test]
    fn test_defaults_fill_gaps_only() {
        let caller = map(&[("authorization", "Bearer caller")]);
        let defaults = map(&[("authorization", "Bearer configured"), ("x-env", "qa")]);

        let merged = build_upstream_headers(&caller, &defaults, false);
        assert_eq!(merged["authorization"], "Bearer caller");
        assert_eq!(merged["x-env"], "qa");
    }
}
