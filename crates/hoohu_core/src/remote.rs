use std::collections::{BTreeMap, HashMap};
use std::env;

use anyhow::{Context, Result, bail};
use reqwest::Url;

use crate::client::{MediaWikiClient, MediaWikiClientConfig, WikiReadApi};
use crate::config::AuthHeaderRule;
use crate::error::BotError;
use crate::resolver::{Resolution, resolve_title};

/// Builds read handles for foreign wikis.
pub trait RemoteConnector {
    type Api: WikiReadApi;

    fn connect(&self, api_url: &str) -> Result<Self::Api>;
}

/// Connector producing real HTTP clients, adding per-host auth headers.
pub struct HttpConnector {
    template: MediaWikiClientConfig,
    auth_rules: Vec<AuthHeaderRule>,
}

impl HttpConnector {
    pub fn new(template: MediaWikiClientConfig, auth_rules: Vec<AuthHeaderRule>) -> Self {
        Self {
            template,
            auth_rules,
        }
    }

    fn config_for(&self, api_url: &str) -> MediaWikiClientConfig {
        let mut config = self.template.with_api_url(api_url);
        let host = Url::parse(api_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();
        for rule in &self.auth_rules {
            if !host_matches(&host, &rule.host_suffix) {
                continue;
            }
            match env::var(&rule.env) {
                Ok(value) if !value.trim().is_empty() => {
                    config = config.with_header(&rule.header, value.trim());
                }
                _ => {
                    tracing::warn!(
                        host = %host,
                        env = %rule.env,
                        "auth key for this host is not set; continuing without it"
                    );
                }
            }
        }
        config
    }
}

/// `host` is `suffix` itself or a subdomain of it.
fn host_matches(host: &str, suffix: &str) -> bool {
    let suffix = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
    if suffix.is_empty() {
        return false;
    }
    host == suffix
        || host
            .strip_suffix(&suffix)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

impl RemoteConnector for HttpConnector {
    type Api = MediaWikiClient;

    fn connect(&self, api_url: &str) -> Result<Self::Api> {
        MediaWikiClient::new(self.config_for(api_url))
    }
}

/// Connect to `api_url` and confirm it answers a siteinfo query.
///
/// A plain-HTTP URL that fails the probe is retried once over HTTPS.
pub fn open_probed<C: RemoteConnector>(connector: &C, api_url: &str) -> Result<C::Api> {
    let error = match connect_and_probe(connector, api_url) {
        Ok(api) => return Ok(api),
        Err(error) => error,
    };
    let Some(rest) = api_url.strip_prefix("http://") else {
        return Err(error);
    };

    let https_url = format!("https://{rest}");
    match connect_and_probe(connector, &https_url) {
        Ok(api) => {
            tracing::warn!(
                url = api_url,
                fallback = %https_url,
                "probe failed; using HTTPS fallback"
            );
            Ok(api)
        }
        Err(fallback_error) => {
            tracing::error!(url = api_url, error = %fallback_error, "HTTP and HTTPS probes both failed");
            Err(fallback_error)
        }
    }
}

fn connect_and_probe<C: RemoteConnector>(connector: &C, api_url: &str) -> Result<C::Api> {
    let mut api = connector.connect(api_url)?;
    api.probe_site_info()
        .with_context(|| format!("siteinfo probe failed for {api_url}"))?;
    Ok(api)
}

/// Per-run cache of probed foreign wiki handles, keyed by language code.
///
/// Lives for one processing run. A language whose probe failed stays
/// unavailable for the rest of the run.
pub struct RemoteHandles<C: RemoteConnector> {
    connector: C,
    sites: BTreeMap<String, String>,
    handles: HashMap<String, C::Api>,
    unavailable: BTreeMap<String, String>,
}

impl<C: RemoteConnector> RemoteHandles<C> {
    pub fn new(connector: C, sites: BTreeMap<String, String>) -> Self {
        Self {
            connector,
            sites,
            handles: HashMap::new(),
            unavailable: BTreeMap::new(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn handle(&mut self, lang: &str) -> Result<&mut C::Api> {
        let key = lang.trim().to_ascii_lowercase();
        if let Some(reason) = self.unavailable.get(&key) {
            bail!("{key} wiki unavailable for this run: {reason}");
        }
        if !self.handles.contains_key(&key) {
            let api_url = self
                .sites
                .get(&key)
                .ok_or_else(|| BotError::Config(format!("no API configured for language {key}")))?;
            match open_probed(&self.connector, api_url) {
                Ok(api) => {
                    self.handles.insert(key.clone(), api);
                }
                Err(error) => {
                    tracing::error!(lang = %key, url = %api_url, error = %error, "could not open remote wiki; skipping language");
                    self.unavailable.insert(key.clone(), error.to_string());
                    return Err(error);
                }
            }
        }
        self.handles
            .get_mut(&key)
            .ok_or_else(|| anyhow::anyhow!("remote handle for {key} disappeared"))
    }

    /// Resolve `title` on the wiki for `lang`. A handle that cannot be opened
    /// yields `Resolution::Error` with an empty chain.
    pub fn resolve(&mut self, lang: &str, title: &str, max_depth: usize) -> Resolution {
        match self.handle(lang) {
            Ok(api) => resolve_title(api, title, max_depth),
            Err(error) => Resolution::Error {
                chain: Vec::new(),
                reason: error.to_string(),
            },
        }
    }

    pub fn cached_langs(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.handles.keys().cloned().collect();
        langs.sort();
        langs
    }
}
