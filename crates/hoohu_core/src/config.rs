use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BotError;

pub const DEFAULT_API_URL: &str = "https://xyy.miraheze.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "hoohu-bot/0.2";
pub const DEFAULT_BOT_NAME: &str = "Hoohu-bot";
pub const DEFAULT_MAX_DEPTH: usize = 20;
pub const DEFAULT_SANDBOX_IDLE_MINUTES: i64 = 60;

const SANDBOX_TOP: &str =
    "<noinclude><!--DO NOT REMOVE THIS LINE-->{{sandbox top}}<!--PERFORM YOUR TEST BELOW--></noinclude>";
const SANDBOX_SUMMARY: &str = "Sandbox cleanup. For long-term testing, please use [[Special:MyPage/sandbox|your personal sandbox]].";
const MODULE_SANDBOX_SUMMARY: &str = "Sandbox cleanup. For long-term testing, please use “Module:Sandbox/Your_username” or its subpages.";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub interlang: InterlangSection,
    #[serde(default)]
    pub redirect: RedirectSection,
    #[serde(default)]
    pub timestamp: TimestampSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub bot_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct InterlangSection {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Language code to foreign API URL. Keys are the allowed interlanguage prefixes.
    #[serde(default = "default_sites")]
    pub sites: BTreeMap<String, String>,
    #[serde(default = "default_auth_rules")]
    pub auth: Vec<AuthHeaderRule>,
}

impl Default for InterlangSection {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            sites: default_sites(),
            auth: default_auth_rules(),
        }
    }
}

/// Extra header attached to requests against hosts ending in `host_suffix`,
/// with the value read from the environment variable `env`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthHeaderRule {
    pub host_suffix: String,
    pub header: String,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RedirectSection {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_redirect_reports")]
    pub reports: Vec<String>,
}

impl Default for RedirectSection {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            reports: default_redirect_reports(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TimestampSection {
    pub page: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SandboxSection {
    #[serde(default = "default_idle_minutes")]
    pub min_idle_minutes: i64,
    #[serde(default = "default_sandbox_pages")]
    pub pages: Vec<SandboxPage>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            min_idle_minutes: DEFAULT_SANDBOX_IDLE_MINUTES,
            pages: default_sandbox_pages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SandboxPage {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub summary: String,
}

impl BotConfig {
    /// Resolve the local wiki API URL: env HOOHU_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_override("HOOHU_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env HOOHU_UA > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("HOOHU_UA")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve bot account name: env HOOHU_BOT_NAME > config > DEFAULT_BOT_NAME.
    pub fn bot_name(&self) -> String {
        env_override("HOOHU_BOT_NAME")
            .or_else(|| self.wiki.bot_name.clone())
            .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string())
    }

    /// The bot password is only ever read from the environment.
    pub fn bot_password(&self) -> Result<String> {
        env_override("HOOHU_PASSWORD").ok_or_else(|| {
            BotError::Config("HOOHU_PASSWORD is required for commands that edit".to_string())
                .into()
        })
    }

    pub fn timestamp_page(&self) -> String {
        self.timestamp
            .page
            .clone()
            .unwrap_or_else(|| format!("User:{}/timestamp", self.bot_name()))
    }

    pub fn allowed_langs(&self) -> Vec<String> {
        self.interlang.sites.keys().cloned().collect()
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let mut parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    // Language codes are matched case-insensitively, so store them lowercased.
    parsed.interlang.sites = parsed
        .interlang
        .sites
        .into_iter()
        .map(|(lang, url)| (lang.trim().to_ascii_lowercase(), url.trim().to_string()))
        .collect();
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_idle_minutes() -> i64 {
    DEFAULT_SANDBOX_IDLE_MINUTES
}

fn default_sites() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "vi".to_string(),
            "https://vi.wikipedia.org/w/api.php".to_string(),
        ),
        ("zh".to_string(), "http://xyy.huijiwiki.com/api.php".to_string()),
    ])
}

fn default_auth_rules() -> Vec<AuthHeaderRule> {
    vec![AuthHeaderRule {
        host_suffix: "huijiwiki.com".to_string(),
        header: "X-authkey".to_string(),
        env: "HUIJI_AUTHKEY".to_string(),
    }]
}

fn default_redirect_reports() -> Vec<String> {
    vec!["DoubleRedirects".to_string(), "BrokenRedirects".to_string()]
}

fn default_sandbox_pages() -> Vec<SandboxPage> {
    vec![
        SandboxPage {
            title: "Pleasant Goat Wiki:Sandbox".to_string(),
            content: SANDBOX_TOP.to_string(),
            summary: SANDBOX_SUMMARY.to_string(),
        },
        SandboxPage {
            title: "Template:Sandbox".to_string(),
            content: SANDBOX_TOP.to_string(),
            summary: SANDBOX_SUMMARY.to_string(),
        },
        SandboxPage {
            title: "Module:Sandbox".to_string(),
            content: String::new(),
            summary: MODULE_SANDBOX_SUMMARY.to_string(),
        },
    ]
}
