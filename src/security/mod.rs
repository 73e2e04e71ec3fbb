//! Response hardening headers.
//!
//! The header set is computed once from configuration and written onto every
//! response that leaves the admission layer. Writing replaces any value the
//! application already set, so decorating twice yields the same headers.

use crate::error::{AdmissionError, Result};
use axum::http::{
    header::{
        CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        X_XSS_PROTECTION,
    },
    HeaderMap, HeaderName, HeaderValue,
};
use axum::response::Response;
use serde::{Deserialize, Serialize};

pub const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

pub const FRAME_OPTIONS_VALUE: &str = "SAMEORIGIN";
pub const CONTENT_TYPE_OPTIONS_VALUE: &str = "nosniff";
pub const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";
pub const XSS_PROTECTION_VALUE: &str = "1; mode=block";
pub const PERMISSIONS_POLICY_VALUE: &str = "geolocation=(self), microphone=(), camera=()";

/// External domains the pages may load from or talk to, per CSP directive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CspConfig {
    #[serde(default)]
    pub script_src: Vec<String>,
    #[serde(default)]
    pub style_src: Vec<String>,
    #[serde(default)]
    pub img_src: Vec<String>,
    #[serde(default)]
    pub connect_src: Vec<String>,
    #[serde(default)]
    pub font_src: Vec<String>,
    #[serde(default)]
    pub frame_src: Vec<String>,
}

impl CspConfig {
    /// Assemble the `Content-Security-Policy` value
    pub fn policy(&self) -> String {
        let directive = |name: &str, base: &[&str], extra: &[String]| {
            let sources: Vec<&str> = base
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str))
                .collect();
            format!("{} {}", name, sources.join(" "))
        };

        [
            "default-src 'self'".to_string(),
            directive("script-src", &["'self'"], &self.script_src),
            directive("style-src", &["'self'", "'unsafe-inline'"], &self.style_src),
            directive("img-src", &["'self'", "data:"], &self.img_src),
            directive("connect-src", &["'self'"], &self.connect_src),
            directive("font-src", &["'self'"], &self.font_src),
            directive("frame-src", &["'self'"], &self.frame_src),
            "object-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
        ]
        .join("; ")
    }
}

/// Security header settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub csp: CspConfig,
    /// Replaces the default `Permissions-Policy`
    #[serde(default)]
    pub permissions_policy: Option<String>,
}

/// Precomputed hardening headers
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| AdmissionError::Config(format!("Invalid security header: {}", e)))
        };

        let permissions = config
            .permissions_policy
            .as_deref()
            .unwrap_or(PERMISSIONS_POLICY_VALUE);

        let headers = vec![
            (X_FRAME_OPTIONS, HeaderValue::from_static(FRAME_OPTIONS_VALUE)),
            (
                X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static(CONTENT_TYPE_OPTIONS_VALUE),
            ),
            (REFERRER_POLICY, HeaderValue::from_static(REFERRER_POLICY_VALUE)),
            (X_XSS_PROTECTION, HeaderValue::from_static(XSS_PROTECTION_VALUE)),
            (PERMISSIONS_POLICY, value(permissions)?),
            (CONTENT_SECURITY_POLICY, value(&config.csp.policy())?),
        ];

        Ok(Self { headers })
    }

    /// Write the hardening headers, replacing existing values
    pub fn decorate(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }

    pub fn decorate_response(&self, mut response: Response) -> Response {
        self.decorate(response.headers_mut());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_csp_policy() {
        let policy = CspConfig::default().policy();
        assert!(policy.starts_with("default-src 'self'; script-src 'self'; "));
        assert!(policy.contains("img-src 'self' data:"));
        assert!(policy.ends_with("form-action 'self'"));
    }

    #[test]
    fn test_csp_includes_configured_domains() {
        let config = CspConfig {
            script_src: vec!["https://maps.googleapis.com".to_string()],
            connect_src: vec![
                "https://api.mapbox.com".to_string(),
                "https://events.mapbox.com".to_string(),
            ],
            ..Default::default()
        };
        let policy = config.policy();

        assert!(policy.contains("script-src 'self' https://maps.googleapis.com;"));
        assert!(policy
            .contains("connect-src 'self' https://api.mapbox.com https://events.mapbox.com;"));
    }

    #[test]
    fn test_decorate_sets_static_headers() {
        let security = SecurityHeaders::new(&SecurityConfig::default()).unwrap();
        let mut headers = HeaderMap::new();
        security.decorate(&mut headers);

        assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
        assert_eq!(
            headers.get("permissions-policy").unwrap(),
            PERMISSIONS_POLICY_VALUE
        );
        assert!(headers.get("content-security-policy").is_some());
    }

    #[test]
    fn test_decorate_is_idempotent() {
        let security = SecurityHeaders::new(&SecurityConfig::default()).unwrap();
        let mut once = HeaderMap::new();
        security.decorate(&mut once);

        let mut twice = once.clone();
        security.decorate(&mut twice);

        assert_eq!(once, twice);
        assert_eq!(twice.get_all(X_FRAME_OPTIONS).iter().count(), 1);
    }

    #[test]
    fn test_decorate_overrides_application_values() {
        let security = SecurityHeaders::new(&SecurityConfig::default()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("ALLOW"));
        headers.insert("x-app", HeaderValue::from_static("kept"));

        security.decorate(&mut headers);

        assert_eq!(headers.get(X_FRAME_OPTIONS).unwrap(), "SAMEORIGIN");
        assert_eq!(headers.get("x-app").unwrap(), "kept");
    }

    #[test]
    fn test_permissions_policy_override() {
        let security = SecurityHeaders::new(&SecurityConfig {
            permissions_policy: Some("geolocation=()".to_string()),
            ..Default::default()
        })
        .unwrap();
        let mut headers = HeaderMap::new();
        security.decorate(&mut headers);
        assert_eq!(headers.get(PERMISSIONS_POLICY).unwrap(), "geolocation=()");
    }

    #[test]
    fn test_invalid_csp_domain_rejected() {
        let config = SecurityConfig {
            csp: CspConfig {
                img_src: vec!["https://cdn.example\n".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(SecurityHeaders::new(&config).is_err());
    }
}
