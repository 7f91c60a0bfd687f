//! Environment-driven settings for the publisher.
//!
//! Values are read once from the process environment (or an injected
//! iterator in tests). Blank values count as unset, and command-line flags
//! applied by the binary take precedence over anything captured here.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::credentials::CredentialFactory;
use crate::http::HttpClientOptions;

/// Notary base URL.
const ENV_NOTARY_URL: &str = "NOTARY_SERVER_URL";
/// Registry base URL used to resolve tag manifests.
const ENV_REGISTRY_URL: &str = "REGISTRY_URL";
/// Full `Authorization` header value presented to the notary.
const ENV_NOTARY_AUTH: &str = "NOTARY_AUTH";
/// Full `Authorization` header value presented to the registry.
const ENV_REGISTRY_AUTH: &str = "REGISTRY_AUTH";
/// Per-request timeout in whole seconds.
const ENV_HTTP_TIMEOUT_SECS: &str = "CONTENT_TRUST_HTTP_TIMEOUT_SECS";
/// Allows `http://` endpoints (local notary/registry setups).
const ENV_ALLOW_PLAINTEXT: &str = "CONTENT_TRUST_ALLOW_PLAINTEXT";
/// Log filter passed to the subscriber.
const ENV_LOG_LEVEL: &str = "CONTENT_TRUST_LOG_LEVEL";

pub const DEFAULT_NOTARY_URL: &str = "https://notary.docker.io";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Registry host whose single-segment repositories live under `library/`.
const DOCKER_HUB_HOST: &str = "docker.io";

/// Captures environment-derived options for one publisher run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEnv {
    pub notary_url: String,
    pub registry_url: String,
    pub notary_auth: Option<String>,
    pub registry_auth: Option<String>,
    pub timeout: Duration,
    pub allow_plaintext: bool,
    pub log_level: String,
}

impl TrustEnv {
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |name: &str| map.get(name).and_then(|value| sanitize_non_empty(value));

        let notary_url = get(ENV_NOTARY_URL)
            .map(trim_trailing_slash)
            .unwrap_or_else(|| DEFAULT_NOTARY_URL.to_string());
        let registry_url = get(ENV_REGISTRY_URL)
            .map(trim_trailing_slash)
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
        // Unparseable or zero timeouts fall back to the default rather than disabling it.
        let timeout = get(ENV_HTTP_TIMEOUT_SECS)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let allow_plaintext = parse_bool(map.get(ENV_ALLOW_PLAINTEXT).map(String::as_str), false);
        let log_level = get(ENV_LOG_LEVEL)
            .map(|value| value.to_lowercase())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Self {
            notary_url,
            registry_url,
            notary_auth: get(ENV_NOTARY_AUTH),
            registry_auth: get(ENV_REGISTRY_AUTH),
            timeout,
            allow_plaintext,
            log_level,
        }
    }

    pub fn credentials(&self) -> CredentialFactory {
        CredentialFactory::new_static(self.notary_auth.clone(), self.registry_auth.clone())
    }

    pub fn http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            allow_plaintext: self.allow_plaintext,
            timeout: self.timeout,
        }
    }
}

impl Default for TrustEnv {
    fn default() -> Self {
        Self::from_env_iter::<Vec<(String, String)>, _, _>(Vec::new())
    }
}

/// Repository path on the registry for a GUN.
///
/// The leading segment is dropped when it names a host (contains `.` or `:`,
/// or is `localhost`), and Docker Hub single-name repositories gain the
/// `library/` namespace: `docker.io/app` becomes `library/app`.
pub fn registry_repository(gun: &str) -> String {
    let gun = gun.trim_matches('/');
    let (host, path) = match gun.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first), rest)
        }
        _ => (None, gun),
    };
    let is_docker_hub = host.map_or(true, |host| host == DOCKER_HUB_HOST);
    if is_docker_hub && !path.contains('/') {
        format!("library/{path}")
    } else {
        path.to_string()
    }
}

fn trim_trailing_slash(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

/// Helper trimming whitespace and discarding empty values.
pub fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
