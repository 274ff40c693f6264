//! Choosing a service config among the candidates published in DNS.
//!
//! A TXT record carries a JSON array of choices. Each choice may restrict
//! itself to some client languages, some client hostnames, or a percentage
//! of clients; the first choice that applies to the resolving client wins.

use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Language reported by clients that don't say otherwise.
pub const DEFAULT_CLIENT_LANGUAGE: &str = "c++";

/// Errors encountered while choosing a service config.
#[derive(Debug, thiserror::Error)]
pub enum ServiceConfigError {
    /// The candidate list is not a JSON array of well-formed choices.
    #[error("malformed service config choices: {0}")]
    Json(#[from] serde_json::Error),
}

/// Facts about the resolving client that choices are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Language the client is written in, e.g. `c++` or `go`.
    pub language: String,
    /// Host the client runs on. Choices restricted by hostname never match
    /// a client without one.
    pub hostname: Option<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            language: DEFAULT_CLIENT_LANGUAGE.to_string(),
            hostname: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct Choice {
    #[serde(default)]
    client_language: Option<Vec<String>>,
    #[serde(default)]
    percentage: Option<i64>,
    #[serde(default)]
    client_hostname: Option<Vec<String>>,
    service_config: Map<String, Value>,
}

impl Choice {
    fn applies_to(&self, client: &ClientIdentity, rng: &mut impl Rng) -> bool {
        if let Some(languages) = &self.client_language {
            if !languages.iter().any(|l| *l == client.language) {
                return false;
            }
        }
        if let Some(percentage) = self.percentage {
            let draw = rng.random_range(0..100);
            if draw > percentage || percentage == 0 {
                return false;
            }
        }
        if let Some(hostnames) = &self.client_hostname {
            match &client.hostname {
                Some(hostname) if hostnames.contains(hostname) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A chosen service config.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig(Map<String, Value>);

impl ServiceConfig {
    /// Compact JSON with object keys sorted.
    pub fn json(&self) -> String {
        // Map is ordered by key, and so are nested objects
        Value::Object(self.0.clone()).to_string()
    }

    /// The config's `loadBalancingPolicy`, lower-cased.
    pub fn lb_policy(&self) -> Option<String> {
        self.0
            .get("loadBalancingPolicy")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
    }

    /// Raw JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Picks the first choice in `json` that applies to `client`.
///
/// Percentage-restricted choices draw a number in `0..100` from `rng` and
/// are skipped when it exceeds the percentage.
///
/// ```
/// use resolver_testbed::service_config::{choose, ClientIdentity};
/// let choices = r#"[
///     {"clientLanguage": ["go"], "serviceConfig": {"loadBalancingPolicy": "pick_first"}},
///     {"serviceConfig": {"loadBalancingPolicy": "ROUND_ROBIN"}}
/// ]"#;
/// let chosen = choose(choices, &ClientIdentity::default(), &mut rand::rng())?.unwrap();
/// assert_eq!(chosen.lb_policy().as_deref(), Some("round_robin"));
/// # Ok::<(), resolver_testbed::service_config::ServiceConfigError>(())
/// ```
pub fn choose(
    json: &str,
    client: &ClientIdentity,
    rng: &mut impl Rng,
) -> Result<Option<ServiceConfig>, ServiceConfigError> {
    let choices: Vec<Choice> = serde_json::from_str(json)?;
    Ok(choices
        .into_iter()
        .find(|choice| choice.applies_to(client, rng))
        .map(|choice| ServiceConfig(choice.service_config)))
}
