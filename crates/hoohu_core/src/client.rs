use std::collections::HashMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BotError;

pub const NS_MAIN: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTag {
    Redirect,
    Sandbox,
    Daily,
}

impl ChangeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "hoohu-redirect",
            Self::Sandbox => "hoohu-sandbox",
            Self::Daily => "hoohu-daily",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditOptions {
    pub summary: String,
    pub tag: Option<ChangeTag>,
}

impl EditOptions {
    pub fn new(summary: impl Into<String>, tag: Option<ChangeTag>) -> Self {
        Self {
            summary: summary.into(),
            tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub nochange: bool,
}

/// One hop of redirect resolution for a single title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectProbe {
    pub title: String,
    /// Set when `title` itself is a redirect source.
    pub redirect_target: Option<String>,
    /// Whether the page reached by the query exists.
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveLogEvent {
    pub timestamp: Option<String>,
    pub target_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRevision {
    pub title: String,
    pub missing: bool,
    pub content: Option<String>,
    pub timestamp: Option<String>,
}

pub trait WikiReadApi {
    fn probe_site_info(&mut self) -> Result<()>;
    fn query_redirect(&mut self, title: &str) -> Result<RedirectProbe>;
    /// Move log entries for `title` in API order (newest first).
    fn get_move_log(&mut self, title: &str) -> Result<Vec<MoveLogEvent>>;
    fn get_page_revisions(&mut self, titles: &[String]) -> Result<Vec<PageRevision>>;
    fn get_query_page(&mut self, report: &str) -> Result<Vec<String>>;
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>>;
    fn request_count(&self) -> usize;

    fn get_page_content(&mut self, title: &str) -> Result<Option<String>> {
        let pages = self.get_page_revisions(&[title.to_string()])?;
        Ok(pages
            .into_iter()
            .find(|page| !page.missing)
            .map(|page| page.content.unwrap_or_default()))
    }
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, title: &str, text: &str, options: &EditOptions) -> Result<EditOutcome>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub extra_headers: Vec<(String, String)>,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &crate::config::BotConfig) -> Self {
        Self::from_env_with_defaults(&config.api_url(), &config.user_agent())
    }

    pub fn from_env_with_defaults(api_url: &str, user_agent: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            user_agent: user_agent.to_string(),
            extra_headers: Vec::new(),
            timeout_ms: env_value_u64("HOOHU_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("HOOHU_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("HOOHU_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("HOOHU_HTTP_RETRIES", 3),
            max_write_retries: env_value_usize("HOOHU_HTTP_WRITE_RETRIES", 2),
            retry_delay_ms: env_value_u64("HOOHU_HTTP_RETRY_DELAY_MS", 500),
        }
    }

    pub fn with_api_url(&self, api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            extra_headers: Vec::new(),
            ..self.clone()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .map_err(|error| BotError::Config(format!("invalid API URL {}: {error}", config.api_url)))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid API URL: {}", self.config.api_url))?;
        let pairs = request_pairs(params);
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            self.apply_rate_limit(false);
            let mut request = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone());
            for (name, value) in &self.config.extra_headers {
                request = request.header(name.as_str(), value.as_str());
            }
            match request.query(&pairs).send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        return Err(transport(format!("HTTP {status} from {}", self.config.api_url)));
                    }
                    let payload: Value = response
                        .json()
                        .map_err(|error| transport(format!("undecodable API response: {error}")))?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(transport(format!("request to {} failed: {error}", self.config.api_url)));
                }
            }
        }

        Err(transport("request exhausted retry budget".to_string()))
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = request_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let mut request = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone());
            for (name, value) in &self.config.extra_headers {
                request = request.header(name.as_str(), value.as_str());
            }
            match request.form(&pairs).send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        return Err(transport(format!("HTTP {status} from {}", self.config.api_url)));
                    }
                    let payload: Value = response
                        .json()
                        .map_err(|error| transport(format!("undecodable API response: {error}")))?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(transport(format!("request to {} failed: {error}", self.config.api_url)));
                }
            }
        }

        Err(transport("request exhausted retry budget".to_string()))
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        tracing::debug!(attempt, api = %self.config.api_url, "retrying MediaWiki request");
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn probe_site_info(&mut self) -> Result<()> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
        ])?;
        if response.pointer("/query/general").is_none() {
            return Err(transport(format!(
                "no siteinfo returned by {}",
                self.config.api_url
            )));
        }
        Ok(())
    }

    fn query_redirect(&mut self, title: &str) -> Result<RedirectProbe> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("redirects", "1".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode redirect query response")?;
        Ok(redirect_probe_from_payload(title, &parsed.query))
    }

    fn get_move_log(&mut self, title: &str) -> Result<Vec<MoveLogEvent>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("list", "logevents".to_string()),
            ("letype", "move".to_string()),
            ("letitle", title.to_string()),
            ("lelimit", "max".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode move log response")?;
        Ok(parsed
            .query
            .logevents
            .into_iter()
            .map(|event| MoveLogEvent {
                timestamp: event.timestamp,
                target_title: event.params.and_then(|params| params.target_title),
            })
            .collect())
    }

    fn get_page_revisions(&mut self, titles: &[String]) -> Result<Vec<PageRevision>> {
        let mut results = Vec::new();
        for batch in titles.chunks(50) {
            let response = self.request_json_get(&[
                ("action", "query".to_string()),
                ("titles", batch.join("|")),
                ("prop", "revisions|info".to_string()),
                ("rvprop", "content|timestamp".to_string()),
                ("rvslots", "main".to_string()),
            ])?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode page revision response")?;
            results.extend(revisions_from_payload(parsed.query));
        }
        Ok(results)
    }

    fn get_query_page(&mut self, report: &str) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "querypage".to_string()),
                ("qppage", report.to_string()),
                ("qplimit", "max".to_string()),
            ];
            if let Some(value) = &offset {
                params.push(("qpoffset", value.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .with_context(|| format!("failed to decode querypage {report} response"))?;
            if let Some(querypage) = parsed.query.querypage {
                for item in querypage.results {
                    titles.push(item.title.trim().to_string());
                }
            }

            offset = parsed
                .continuation
                .and_then(|cont| cont.qpoffset)
                .map(|value| value_to_param(&value));
            if offset.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("aplimit", "max".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("apcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode allpages API response")?;

            for item in parsed.query.allpages {
                titles.push(item.title);
            }

            continue_token = parsed.continuation.and_then(|cont| cont.apcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self
            .request_json_get(&[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ])
            .map_err(|error| BotError::Auth(format!("could not fetch login token: {error}")))?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| BotError::Auth("no login token returned".to_string()))?;

        let login_response = self
            .request_json_post(
                &[
                    ("action", "login".to_string()),
                    ("lgname", username.to_string()),
                    ("lgpassword", password.to_string()),
                    ("lgtoken", login_token),
                ],
                true,
            )
            .map_err(|error| BotError::Auth(error.to_string()))?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                tracing::info!(user = username, api = %self.config.api_url, "logged in");
                Ok(())
            }
            other => Err(BotError::Auth(
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string()),
            )
            .into()),
        }
    }

    fn edit_page(&mut self, title: &str, text: &str, options: &EditOptions) -> Result<EditOutcome> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", text.to_string()),
            ("summary", options.summary.clone()),
            ("bot", "1".to_string()),
            ("watchlist", "nochange".to_string()),
        ];
        if let Some(tag) = options.tag {
            params.push(("tags", tag.as_str().to_string()));
        }
        params.push(("token", token));

        let response = self.request_json_post(&params, true)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            return Err(transport(format!(
                "edit of {title} was not accepted: {}",
                edit.result.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        Ok(EditOutcome {
            title: title.to_string(),
            new_revision_id: edit.newrevid,
            nochange: edit.nochange.unwrap_or(false),
        })
    }
}

fn redirect_probe_from_payload(title: &str, query: &QueryPayload) -> RedirectProbe {
    let requested = title.trim();
    let lookup = query
        .normalized
        .iter()
        .find(|item| item.from.trim() == requested)
        .map(|item| item.to.trim())
        .unwrap_or(requested);
    let redirect_target = query
        .redirects
        .iter()
        .find(|item| {
            let from = item.from.trim();
            from == requested || from == lookup
        })
        .map(|item| item.to.trim().to_string());
    let exists = query
        .pages
        .first()
        .map(|page| !page.missing.unwrap_or(false) && !page.invalid.unwrap_or(false))
        .unwrap_or(false);

    RedirectProbe {
        title: requested.to_string(),
        redirect_target,
        exists,
    }
}

/// Page revisions keyed by the title that was requested.
///
/// The API reports pages under their normalized (or variant-converted)
/// title; both mappings are undone so callers can match on what they sent.
fn revisions_from_payload(query: QueryPayload) -> Vec<PageRevision> {
    let requested: HashMap<String, String> = query
        .normalized
        .iter()
        .chain(query.converted.iter())
        .map(|item| (item.to.clone(), item.from.clone()))
        .collect();
    let original_title = |title: String| {
        let mut current = title;
        // normalized then converted can chain; bounded by the mapping count
        for _ in 0..=requested.len() {
            match requested.get(&current) {
                Some(from) if *from != current => current = from.clone(),
                _ => break,
            }
        }
        current
    };

    query
        .pages
        .into_iter()
        .map(|page| {
            let missing = page.missing.unwrap_or(false) || page.invalid.unwrap_or(false);
            let revision = page.revisions.into_iter().next();
            let timestamp = revision.as_ref().map(|rev| rev.timestamp.clone());
            let content = revision
                .and_then(|rev| rev.slots)
                .and_then(|slots| slots.main)
                .map(|slot| slot.content);
            PageRevision {
                title: original_title(page.title),
                missing,
                content,
                timestamp,
            }
        })
        .collect()
}

fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(transport(format!("MediaWiki API error [{code}]: {info}")));
    }
    Ok(payload)
}

fn transport(message: String) -> anyhow::Error {
    BotError::Transport(message).into()
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    normalized: Vec<TitleMappingItem>,
    #[serde(default)]
    converted: Vec<TitleMappingItem>,
    #[serde(default)]
    redirects: Vec<TitleMappingItem>,
    #[serde(default)]
    logevents: Vec<LogEventItem>,
    querypage: Option<QueryPagePayload>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    apcontinue: Option<String>,
    qpoffset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct TitleMappingItem {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct LogEventItem {
    timestamp: Option<String>,
    params: Option<MoveParams>,
}

#[derive(Debug, Deserialize)]
struct MoveParams {
    target_title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPagePayload {
    #[serde(default)]
    results: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    newrevid: Option<i64>,
    nochange: Option<bool>,
}
