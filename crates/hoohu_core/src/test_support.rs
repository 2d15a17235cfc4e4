use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use crate::client::{
    EditOptions, EditOutcome, MoveLogEvent, NS_MAIN, PageRevision, RedirectProbe, WikiReadApi,
    WikiWriteApi,
};
use crate::error::BotError;
use crate::remote::RemoteConnector;

#[derive(Debug, Clone)]
pub struct MockPage {
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct RecordedEdit {
    pub title: String,
    pub text: String,
    pub options: EditOptions,
}

#[derive(Default)]
pub struct MockWiki {
    pub pages: BTreeMap<String, MockPage>,
    pub redirects: BTreeMap<String, String>,
    pub moves: BTreeMap<String, Vec<Option<String>>>,
    pub query_pages: BTreeMap<String, Vec<String>>,
    pub main_namespace: Vec<String>,
    /// Requested title to the title pages are stored under, like `normalized`.
    pub aliases: BTreeMap<String, String>,
    pub failing_titles: BTreeSet<String>,
    pub probe_fails: bool,
    pub reject_login: bool,
    pub logged_in: bool,
    pub edits: Vec<RecordedEdit>,
    pub request_log: Vec<String>,
}

impl MockWiki {
    pub fn with_page(self, title: &str) -> Self {
        self.with_content(title, "page body", "2026-01-01T00:00:00Z")
    }

    pub fn with_content(mut self, title: &str, content: &str, timestamp: &str) -> Self {
        self.pages.insert(
            title.to_string(),
            MockPage {
                content: content.to_string(),
                timestamp: timestamp.to_string(),
            },
        );
        self
    }

    pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_move(mut self, title: &str, target: Option<&str>) -> Self {
        self.moves
            .entry(title.to_string())
            .or_default()
            .push(target.map(ToString::to_string));
        self
    }

    pub fn with_query_page(mut self, report: &str, titles: &[&str]) -> Self {
        self.query_pages.insert(
            report.to_string(),
            titles.iter().map(ToString::to_string).collect(),
        );
        self
    }

    pub fn with_alias(mut self, requested: &str, stored: &str) -> Self {
        self.aliases.insert(requested.to_string(), stored.to_string());
        self
    }

    pub fn failing_on(mut self, title: &str) -> Self {
        self.failing_titles.insert(title.to_string());
        self
    }

    pub fn content_of(&self, title: &str) -> Option<&str> {
        self.pages.get(title).map(|page| page.content.as_str())
    }

    fn fail_if_requested(&self, title: &str) -> Result<()> {
        if self.failing_titles.contains(title) {
            return Err(BotError::Transport(format!("simulated failure for {title}")).into());
        }
        Ok(())
    }
}

impl WikiReadApi for MockWiki {
    fn probe_site_info(&mut self) -> Result<()> {
        self.request_log.push("siteinfo".to_string());
        if self.probe_fails {
            bail!("siteinfo unavailable");
        }
        Ok(())
    }

    fn query_redirect(&mut self, title: &str) -> Result<RedirectProbe> {
        self.request_log.push(format!("redirect:{title}"));
        self.fail_if_requested(title)?;
        let redirect_target = self.redirects.get(title).cloned();
        let landing = redirect_target.as_deref().unwrap_or(title);
        let exists = self.pages.contains_key(landing) || self.redirects.contains_key(landing);
        Ok(RedirectProbe {
            title: title.to_string(),
            redirect_target,
            exists,
        })
    }

    fn get_move_log(&mut self, title: &str) -> Result<Vec<MoveLogEvent>> {
        self.request_log.push(format!("movelog:{title}"));
        self.fail_if_requested(title)?;
        Ok(self
            .moves
            .get(title)
            .map(|targets| {
                targets
                    .iter()
                    .map(|target| MoveLogEvent {
                        timestamp: None,
                        target_title: target.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_page_revisions(&mut self, titles: &[String]) -> Result<Vec<PageRevision>> {
        self.request_log.push(format!("revisions:{}", titles.join("|")));
        let mut output = Vec::new();
        for title in titles {
            self.fail_if_requested(title)?;
            let stored = self.aliases.get(title).unwrap_or(title);
            if let Some(page) = self.pages.get(stored) {
                output.push(PageRevision {
                    title: title.clone(),
                    missing: false,
                    content: Some(page.content.clone()),
                    timestamp: Some(page.timestamp.clone()),
                });
            } else if let Some(target) = self.redirects.get(stored) {
                output.push(PageRevision {
                    title: title.clone(),
                    missing: false,
                    content: Some(format!("#REDIRECT [[{target}]]")),
                    timestamp: Some("2026-01-01T00:00:00Z".to_string()),
                });
            } else {
                output.push(PageRevision {
                    title: title.clone(),
                    missing: true,
                    content: None,
                    timestamp: None,
                });
            }
        }
        Ok(output)
    }

    fn get_query_page(&mut self, report: &str) -> Result<Vec<String>> {
        self.request_log.push(format!("querypage:{report}"));
        Ok(self.query_pages.get(report).cloned().unwrap_or_default())
    }

    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        self.request_log.push(format!("allpages:{namespace}"));
        if namespace == NS_MAIN {
            Ok(self.main_namespace.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn request_count(&self) -> usize {
        self.request_log.len()
    }
}

impl WikiWriteApi for MockWiki {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        self.request_log.push("login".to_string());
        if self.reject_login {
            return Err(BotError::Auth("WrongPass".to_string()).into());
        }
        self.logged_in = true;
        Ok(())
    }

    fn edit_page(&mut self, title: &str, text: &str, options: &EditOptions) -> Result<EditOutcome> {
        self.request_log.push(format!("edit:{title}"));
        if !self.logged_in {
            bail!("not logged in");
        }
        self.fail_if_requested(title)?;
        self.edits.push(RecordedEdit {
            title: title.to_string(),
            text: text.to_string(),
            options: options.clone(),
        });
        self.redirects.remove(title);
        self.pages.insert(
            title.to_string(),
            MockPage {
                content: text.to_string(),
                timestamp: "2026-10-16T00:00:00Z".to_string(),
            },
        );
        Ok(EditOutcome {
            title: title.to_string(),
            new_revision_id: Some(i64::try_from(self.edits.len()).unwrap_or(0)),
            nochange: false,
        })
    }
}

/// Hands out one pre-built `MockWiki` per API URL and records every connect.
#[derive(Default)]
pub struct MockConnector {
    pub wikis: RefCell<BTreeMap<String, MockWiki>>,
    pub connects: RefCell<Vec<String>>,
}

impl MockConnector {
    pub fn with_wiki(self, url: &str, wiki: MockWiki) -> Self {
        self.wikis.borrow_mut().insert(url.to_string(), wiki);
        self
    }
}

impl RemoteConnector for MockConnector {
    type Api = MockWiki;

    fn connect(&self, api_url: &str) -> Result<MockWiki> {
        self.connects.borrow_mut().push(api_url.to_string());
        match self.wikis.borrow_mut().remove(api_url) {
            Some(wiki) => Ok(wiki),
            None => bail!("connection refused: {api_url}"),
        }
    }
}
