use crate::error::{AdmissionError, Result};
use crate::rate_limit::middleware::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET};
use axum::http::{
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
        ACCESS_CONTROL_MAX_AGE, RETRY_AFTER, VARY,
    },
    HeaderMap, HeaderName, HeaderValue, Method,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

/// CORS allow-policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins (use ["*"] for all origins)
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,
    /// Allowed headers (use ["*"] to echo whatever the preflight asks for)
    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,
    /// Exposed headers
    #[serde(default = "default_exposed_headers")]
    pub exposed_headers: Vec<String>,
    /// Allow credentials
    #[serde(default)]
    pub allow_credentials: bool,
    /// Max age for preflight cache in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "POST".to_string(),
        "PUT".to_string(),
        "DELETE".to_string(),
        "PATCH".to_string(),
        "OPTIONS".to_string(),
    ]
}

fn default_headers() -> Vec<String> {
    vec![
        "Content-Type".to_string(),
        "Authorization".to_string(),
        "X-Requested-With".to_string(),
    ]
}

fn default_exposed_headers() -> Vec<String> {
    [RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET, RETRY_AFTER]
        .iter()
        .map(|h| h.as_str().to_string())
        .collect()
}

fn default_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            exposed_headers: default_exposed_headers(),
            allow_credentials: false,
            max_age_secs: default_max_age(),
        }
    }
}

impl CorsConfig {
    /// Create a restrictive CORS configuration (specific origins only)
    pub fn restrictive(origins: Vec<String>) -> Self {
        Self {
            allowed_origins: origins,
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            exposed_headers: default_exposed_headers(),
            allow_credentials: true,
            max_age_secs: 600, // 10 minutes
        }
    }

    fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.allows_any_origin() && self.allow_credentials {
            return Err(AdmissionError::Config(
                "CORS wildcard origin cannot be combined with allow_credentials".to_string(),
            ));
        }

        for origin in self.allowed_origins.iter().filter(|o| o.as_str() != "*") {
            let url = Url::parse(origin).map_err(|e| {
                AdmissionError::Config(format!("Invalid CORS origin '{}': {}", origin, e))
            })?;

            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(AdmissionError::Config(format!(
                    "CORS origin must be an http(s) origin: {}",
                    origin
                )));
            }

            if url.path() != "/" || url.query().is_some() {
                return Err(AdmissionError::Config(format!(
                    "CORS origin must not carry a path or query: {}",
                    origin
                )));
            }
        }

        Ok(())
    }
}

/// Result of evaluating a request against the CORS policy
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Origin not allowed; the request stops here
    Rejected,
    /// Allowed preflight; answer it directly with these headers
    PreflightSatisfied(HeaderMap),
    /// Continue; merge these headers into the final response
    PassThrough(HeaderMap),
}

/// Evaluates cross-origin requests against a fixed [`CorsConfig`]
#[derive(Debug, Clone)]
pub struct CorsGate {
    any_origin: bool,
    origins: HashSet<String>,
    allow_methods: HeaderValue,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl CorsGate {
    /// Build a gate from this configuration
    pub fn new(config: &CorsConfig) -> Result<Self> {
        config.validate()?;

        let origins = config
            .allowed_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .map(|o| {
                Url::parse(o)
                    .map(|url| url.origin().ascii_serialization())
                    .map_err(|e| {
                        AdmissionError::Config(format!("Invalid CORS origin '{}': {}", o, e))
                    })
            })
            .collect::<Result<HashSet<_>>>()?;

        let methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_uppercase().as_bytes())
                    .map(|m| m.to_string())
                    .map_err(|e| AdmissionError::Config(format!("Invalid CORS method: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let allow_headers = if config.allowed_headers.iter().any(|h| h == "*") {
            debug!("CORS: Echoing requested headers");
            None
        } else {
            Some(header_list(&config.allowed_headers)?)
        };

        let expose_headers = if config.exposed_headers.is_empty() {
            None
        } else {
            Some(header_list(&config.exposed_headers)?)
        };

        debug!(
            origins = ?config.allowed_origins,
            methods = ?methods,
            credentials = config.allow_credentials,
            "CORS: Configured gate"
        );

        Ok(Self {
            any_origin: config.allows_any_origin(),
            origins,
            allow_methods: join_value(&methods)?,
            allow_headers,
            expose_headers,
            allow_credentials: config.allow_credentials,
            max_age: HeaderValue::from(config.max_age_secs),
        })
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.any_origin || self.origins.contains(&normalize_origin(origin))
    }

    /// Decide what to do with a request given its `Origin`, method and
    /// `Access-Control-Request-Headers`
    pub fn evaluate(
        &self,
        origin: Option<&str>,
        method: &Method,
        requested_headers: Option<&str>,
    ) -> GateOutcome {
        let Some(origin) = origin else {
            return GateOutcome::PassThrough(HeaderMap::new());
        };

        let origin_value = match HeaderValue::from_str(origin) {
            Ok(value) if self.origin_allowed(origin) => value,
            _ => {
                warn!(origin = %origin, "CORS: Origin not allowed");
                return GateOutcome::Rejected;
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin_value);
        headers.insert(VARY, HeaderValue::from_static("origin"));
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }

        if *method == Method::OPTIONS {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
            let allow_headers = match &self.allow_headers {
                Some(value) => Some(value.clone()),
                None => requested_headers.and_then(|h| HeaderValue::from_str(h).ok()),
            };
            if let Some(value) = allow_headers {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
            headers.insert(ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
            debug!(origin = %origin, "CORS: Preflight satisfied");
            return GateOutcome::PreflightSatisfied(headers);
        }

        if let Some(value) = &self.expose_headers {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value.clone());
        }
        GateOutcome::PassThrough(headers)
    }
}

/// Serialized `scheme://host[:port]` form; opaque values such as `null` are kept as sent
fn normalize_origin(origin: &str) -> String {
    Url::parse(origin)
        .ok()
        .map(|url| url.origin())
        .filter(|o| o.is_tuple())
        .map(|o| o.ascii_serialization())
        .unwrap_or_else(|| origin.to_string())
}

/// Merge the CORS headers in `cors` into `target`.
///
/// `Vary` is extended rather than replaced; every other header is overwritten.
pub fn apply_cors_headers(target: &mut HeaderMap, cors: &HeaderMap) {
    for (name, value) in cors {
        if *name == VARY {
            merge_vary(target, value);
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn merge_vary(target: &mut HeaderMap, value: &HeaderValue) {
    let Ok(added) = value.to_str() else {
        return;
    };

    let existing: Vec<String> = target
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();

    if existing.iter().any(|v| v == "*" || v.eq_ignore_ascii_case(added)) {
        return;
    }

    if existing.is_empty() {
        target.insert(VARY, value.clone());
        return;
    }

    let merged = format!("{}, {}", existing.join(", "), added);
    if let Ok(merged) = HeaderValue::from_str(&merged) {
        target.insert(VARY, merged);
    }
}

fn header_list(names: &[String]) -> Result<HeaderValue> {
    let names = names
        .iter()
        .map(|h| {
            h.parse::<HeaderName>()
                .map(|n| n.as_str().to_string())
                .map_err(|e| AdmissionError::Config(format!("Invalid CORS header name: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;
    join_value(&names)
}

fn join_value(items: &[String]) -> Result<HeaderValue> {
    HeaderValue::from_str(&items.join(", "))
        .map_err(|e| AdmissionError::Config(format!("Invalid CORS header value: {}", e)))
}
