//! Agent configuration loaded once at startup.
//!
//! Operator settings live in a TOML file (default `/etc/agent/config.toml`);
//! missing fields take the defaults below and a missing file means all
//! defaults. A few deployment values are taken from the environment, and the
//! platform credential is only ever read from the environment.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::types::Quotas;
use crate::error::ConfigInvalid;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/agent/config.toml";

pub const ENV_API_KEY: &str = "AGENT_API_KEY";
pub const ENV_ORACLE_URL: &str = "ORACLE_URL";
pub const ENV_ORACLE_MODEL: &str = "ORACLE_MODEL";
pub const ENV_CONTENT_BASE_URL: &str = "CONTENT_BASE_URL";

/// Largest candidate set the oracle prompt may carry.
pub const MAX_CANDIDATES_CEILING: usize = 50;

/// Persona, quotas, and endpoint settings (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity text placed at the top of every oracle prompt.
    pub persona: String,
    /// Search terms queried every cycle.
    pub topics: Vec<String>,
    /// Communities browsed every cycle; posts go to one of these.
    pub communities: Vec<String>,

    /// Delay between the end of one cycle and the start of the next.
    pub cycle_interval_secs: u64,
    pub max_comments_per_cycle: u32,
    pub max_posts_per_cycle: u32,
    /// Minimum time between two created posts.
    pub post_cooldown_secs: u64,
    /// Independent admission probability for each proposed vote.
    pub vote_probability: f64,

    /// Cap on candidates shown to the oracle per cycle.
    pub max_candidates: usize,
    /// Cap on ids remembered by the dedup store.
    pub dedup_capacity: usize,
    /// Fixed seed for vote sampling; entropy-seeded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,

    pub oracle: OracleConfig,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// Chat-completions endpoint.
    pub url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Reachability probes attempted before the loop starts.
    pub probe_retries: u32,
    pub probe_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContentConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub search_limit: u32,
    pub feed_limit: u32,
    /// Attempts for a read that keeps getting HTTP 429.
    pub rate_limit_retries: u32,
    /// Body characters kept in each candidate summary.
    pub summary_body_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            persona: "A thoughtful AI interested in technology and society.".to_string(),
            topics: vec![
                "technology".to_string(),
                "AI".to_string(),
                "open source".to_string(),
            ],
            communities: vec!["general".to_string()],
            cycle_interval_secs: 300,
            max_comments_per_cycle: 3,
            max_posts_per_cycle: 1,
            post_cooldown_secs: 30 * 60,
            vote_probability: 0.7,
            max_candidates: 15,
            dedup_capacity: 10_000,
            rng_seed: None,
            oracle: OracleConfig::default(),
            content: ContentConfig::default(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "http://ollama:11434/v1/chat/completions".to_string(),
            model: "qwen2.5:3b".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            timeout_secs: 120,
            probe_retries: 60,
            probe_delay_secs: 5,
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.moltbook.com/api".to_string(),
            timeout_secs: 15,
            search_limit: 5,
            feed_limit: 10,
            rate_limit_retries: 3,
            summary_body_chars: 200,
        }
    }
}

impl AgentConfig {
    pub fn quotas(&self) -> Quotas {
        Quotas {
            max_comments: self.max_comments_per_cycle,
            max_posts: self.max_posts_per_cycle,
            post_cooldown: Duration::from_secs(self.post_cooldown_secs),
            vote_probability: self.vote_probability,
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    /// Collect every problem rather than stopping at the first.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.persona.trim().is_empty() {
            problems.push("persona must not be empty".to_string());
        }
        if self.topics.is_empty() && self.communities.is_empty() {
            problems.push("at least one topic or community is required".to_string());
        }
        if self.communities.is_empty() && self.max_posts_per_cycle > 0 {
            problems.push("communities must not be empty when posting is enabled".to_string());
        }
        for topic in &self.topics {
            if topic.trim().is_empty() {
                problems.push("topics must not contain blank entries".to_string());
                break;
            }
        }
        for community in &self.communities {
            if community.trim().is_empty() {
                problems.push("communities must not contain blank entries".to_string());
                break;
            }
        }
        if self.cycle_interval_secs == 0 {
            problems.push("cycle_interval_secs must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.vote_probability) {
            problems.push(format!(
                "vote_probability must be within [0, 1] (got {})",
                self.vote_probability
            ));
        }
        if self.max_candidates == 0 || self.max_candidates > MAX_CANDIDATES_CEILING {
            problems.push(format!(
                "max_candidates must be within 1..={MAX_CANDIDATES_CEILING} (got {})",
                self.max_candidates
            ));
        }
        if self.dedup_capacity == 0 {
            problems.push("dedup_capacity must be > 0".to_string());
        }

        check_url(&mut problems, "oracle.url", &self.oracle.url);
        if self.oracle.model.trim().is_empty() {
            problems.push("oracle.model must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            problems.push(format!(
                "oracle.temperature must be within [0, 2] (got {})",
                self.oracle.temperature
            ));
        }
        if self.oracle.max_tokens == 0 {
            problems.push("oracle.max_tokens must be > 0".to_string());
        }
        if self.oracle.timeout_secs == 0 {
            problems.push("oracle.timeout_secs must be > 0".to_string());
        }

        check_url(&mut problems, "content.base_url", &self.content.base_url);
        if self.content.timeout_secs == 0 {
            problems.push("content.timeout_secs must be > 0".to_string());
        }
        if self.content.search_limit == 0 || self.content.feed_limit == 0 {
            problems.push("content.search_limit and content.feed_limit must be > 0".to_string());
        }
        if self.content.rate_limit_retries == 0 {
            problems.push("content.rate_limit_retries must be > 0".to_string());
        }
        if self.content.summary_body_chars == 0 {
            problems.push("content.summary_body_chars must be > 0".to_string());
        }

        problems
    }

    pub fn validate(&self) -> Result<(), ConfigInvalid> {
        let problems = self.problems();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ConfigInvalid { problems })
    }
}

fn check_url(problems: &mut Vec<String>, field: &str, raw: &str) {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => problems.push(format!("{field} must be http(s) (got {})", url.scheme())),
        Err(err) => problems.push(format!("{field} is not a valid URL: {err}")),
    }
}

/// Platform credential. Never serialized and redacted from `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Validated startup settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: AgentConfig,
    pub credentials: Credentials,
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigInvalid> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(AgentConfig::default());
        }
        Err(err) => {
            return Err(ConfigInvalid {
                problems: vec![format!("read {}: {err}", path.display())],
            });
        }
    };
    debug!(path = %path.display(), "loading config");
    toml::from_str(&contents).map_err(|err| ConfigInvalid {
        problems: vec![format!("parse {}: {err}", path.display())],
    })
}

/// Load the file, apply environment overrides, and validate the result.
///
/// `lookup` abstracts `std::env::var` so tests can supply a fixed environment.
pub fn load_settings<F>(path: &Path, lookup: F) -> Result<Settings, ConfigInvalid>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, &lookup);

    let mut problems = config.problems();
    let api_key = lookup(ENV_API_KEY).unwrap_or_default();
    if api_key.trim().is_empty() {
        problems.push(format!("{ENV_API_KEY} is not set"));
    }
    if !problems.is_empty() {
        return Err(ConfigInvalid { problems });
    }

    Ok(Settings {
        config,
        credentials: Credentials::new(api_key.trim()),
    })
}

pub fn apply_env_overrides<F>(config: &mut AgentConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(url) = non_empty(ENV_ORACLE_URL) {
        config.oracle.url = url;
    }
    if let Some(model) = non_empty(ENV_ORACLE_MODEL) {
        config.oracle.model = model;
    }
    if let Some(url) = non_empty(ENV_CONTENT_BASE_URL) {
        config.content.base_url = url;
    }
}
