use std::path::PathBuf;
use std::time::Duration;

/// Desktop-browser identity presented to the rating portal and on probes.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

/// Top-level shell configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub home_url: String,
    pub policy_path: Option<PathBuf>,
    pub oracle: OracleConfig,
    pub probe: ProbeConfig,
    pub duplicate_open_window: Duration,
}

/// Rating-portal protocol parameters.
///
/// The form-field names and the blocked marker mirror the portal's current
/// markup. They are an external-format dependency, not a stable contract.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub endpoint: String,
    pub token_field: String,
    pub url_field: String,
    pub submit_field: String,
    pub blocked_marker: String,
    pub user_agent: String,
    pub cache_ttl: Duration,
}

/// Reachability-probe parameters.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub search_url_prefix: String,
    pub fallback_search_term: String,
    pub user_agent: String,
}

impl ShellConfig {
    /// Configuration matching the fragfinn.de rating service.
    pub fn fragfinn_defaults() -> Self {
        Self {
            home_url: "https://www.fragfinn.de".to_string(),
            policy_path: Some(PathBuf::from("parental-policy.json")),
            oracle: OracleConfig {
                endpoint: "https://eltern.fragfinn.de/url-check/".to_string(),
                token_field: "_ff_form_verify_url_nonce".to_string(),
                url_field: "ff_verify_uri".to_string(),
                submit_field: "ff-form-verify-url-submit".to_string(),
                blocked_marker: "class=\"website-not-published\"".to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                cache_ttl: Duration::from_secs(5 * 60),
            },
            probe: ProbeConfig {
                timeout: Duration::from_secs(10),
                search_url_prefix: "https://www.fragfinn.de/?stype=&s=".to_string(),
                fallback_search_term: "kinderseiten".to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            duplicate_open_window: Duration::from_millis(500),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self::fragfinn_defaults()
    }
}
