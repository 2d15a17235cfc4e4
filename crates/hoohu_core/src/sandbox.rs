use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::{ChangeTag, EditOptions, MediaWikiClient, MediaWikiClientConfig, WikiWriteApi};
use crate::config::{BotConfig, SandboxPage};

#[derive(Debug, Clone)]
pub struct SandboxResetOptions {
    pub pages: Vec<SandboxPage>,
    pub min_idle_minutes: i64,
    pub dry_run: bool,
}

impl SandboxResetOptions {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            pages: config.sandbox.pages.clone(),
            min_idle_minutes: config.sandbox.min_idle_minutes,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxPageResult {
    pub title: String,
    pub action: String,
    pub idle_minutes: Option<i64>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SandboxResetReport {
    pub success: bool,
    pub dry_run: bool,
    pub reset: usize,
    pub unchanged: usize,
    pub recently_edited: usize,
    pub errors: Vec<String>,
    pub pages: Vec<SandboxPageResult>,
    pub request_count: usize,
}

pub fn reset_sandboxes(config: &BotConfig, options: &SandboxResetOptions) -> Result<SandboxResetReport> {
    let username = config.bot_name();
    let password = if options.dry_run {
        None
    } else {
        Some(config.bot_password()?)
    };
    let credentials = password
        .as_deref()
        .map(|password| (username.as_str(), password));
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    reset_sandboxes_with_api(&mut client, options, credentials, Utc::now())
}

pub fn reset_sandboxes_with_api<A: WikiWriteApi>(
    api: &mut A,
    options: &SandboxResetOptions,
    credentials: Option<(&str, &str)>,
    now: DateTime<Utc>,
) -> Result<SandboxResetReport> {
    if let Some((username, password)) = credentials {
        api.login(username, password)
            .context("sandbox reset login failed")?;
    }

    let titles: Vec<String> = options.pages.iter().map(|page| page.title.clone()).collect();
    let revisions = api
        .get_page_revisions(&titles)
        .context("failed to load sandbox pages")?;

    let mut report = SandboxResetReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    for page in &options.pages {
        let Some(current) = revisions.iter().find(|revision| revision.title == page.title) else {
            tracing::error!(title = %page.title, stage = "fetch", "no revision data returned for sandbox");
            report.errors.push(format!("{}: no revision data returned", page.title));
            report.pages.push(SandboxPageResult {
                title: page.title.clone(),
                action: "error".to_string(),
                idle_minutes: None,
                detail: Some("no revision data returned".to_string()),
            });
            continue;
        };
        let missing = current.missing;
        let content = current.content.clone().unwrap_or_default();
        let idle_minutes = current
            .timestamp
            .as_deref()
            .and_then(|timestamp| minutes_since(timestamp, now));

        if !missing && content == page.content {
            tracing::info!(title = %page.title, "sandbox already clean");
            report.unchanged += 1;
            report.pages.push(SandboxPageResult {
                title: page.title.clone(),
                action: "unchanged".to_string(),
                idle_minutes,
                detail: None,
            });
            continue;
        }

        if !missing && idle_minutes.is_some_and(|minutes| minutes <= options.min_idle_minutes) {
            tracing::info!(title = %page.title, idle_minutes = ?idle_minutes, "sandbox edited recently; skipping");
            report.recently_edited += 1;
            report.pages.push(SandboxPageResult {
                title: page.title.clone(),
                action: "recently_edited".to_string(),
                idle_minutes,
                detail: None,
            });
            continue;
        }

        let mut result = SandboxPageResult {
            title: page.title.clone(),
            action: if options.dry_run { "would_reset" } else { "reset" }.to_string(),
            idle_minutes,
            detail: missing.then(|| "page was missing".to_string()),
        };
        if !options.dry_run {
            let edit = EditOptions::new(page.summary.clone(), Some(ChangeTag::Sandbox));
            if let Err(error) = api.edit_page(&page.title, &page.content, &edit) {
                tracing::error!(title = %page.title, stage = "edit", error = %error, "sandbox reset failed");
                report.errors.push(format!("{}: {error}", page.title));
                result.action = "error".to_string();
                result.detail = Some(error.to_string());
                report.pages.push(result);
                continue;
            }
            tracing::info!(title = %page.title, idle_minutes = ?idle_minutes, "sandbox reset");
        }
        report.reset += 1;
        report.pages.push(result);
    }

    report.success = report.errors.is_empty();
    report.request_count = api.request_count();
    Ok(report)
}

/// Whole minutes between an API timestamp and `now`; `None` when unparsable.
fn minutes_since(timestamp: &str, now: DateTime<Utc>) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(timestamp).ok()?;
    Some((now - parsed.with_timezone(&Utc)).num_minutes())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::{SandboxResetOptions, minutes_since, reset_sandboxes_with_api};
    use crate::client::ChangeTag;
    use crate::config::SandboxPage;
    use crate::test_support::MockWiki;

    const CLEAN: &str = "<noinclude>{{sandbox top}}</noinclude>";

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn options(dry_run: bool) -> SandboxResetOptions {
        SandboxResetOptions {
            pages: vec![SandboxPage {
                title: "Project:Sandbox".to_string(),
                content: CLEAN.to_string(),
                summary: "Sandbox cleanup.".to_string(),
            }],
            min_idle_minutes: 60,
            dry_run,
        }
    }

    #[test]
    fn stale_dirty_sandbox_is_reset() {
        let mut wiki = MockWiki::default().with_content(
            "Project:Sandbox",
            "test edit",
            "2026-10-16T10:00:00Z",
        );

        let report = reset_sandboxes_with_api(&mut wiki, &options(false), Some(("bot", "pw")), now())
            .expect("run");

        assert_eq!(report.reset, 1);
        assert_eq!(report.pages[0].idle_minutes, Some(120));
        assert_eq!(wiki.content_of("Project:Sandbox"), Some(CLEAN));
        assert_eq!(wiki.edits[0].options.tag, Some(ChangeTag::Sandbox));
        assert_eq!(wiki.edits[0].options.summary, "Sandbox cleanup.");
    }

    #[test]
    fn recently_edited_sandbox_is_left_alone() {
        let mut wiki = MockWiki::default().with_content(
            "Project:Sandbox",
            "test in progress",
            "2026-10-16T11:30:00Z",
        );

        let report = reset_sandboxes_with_api(&mut wiki, &options(false), Some(("bot", "pw")), now())
            .expect("run");

        assert_eq!(report.recently_edited, 1);
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn normalized_sandbox_title_keeps_the_idle_check() {
        let mut wiki = MockWiki::default()
            .with_content(
                "Pleasant Goat Wiki:Sandbox",
                "test in progress",
                "2026-10-16T11:30:00Z",
            )
            .with_alias("Project:Sandbox", "Pleasant Goat Wiki:Sandbox");

        let report = reset_sandboxes_with_api(&mut wiki, &options(false), Some(("bot", "pw")), now())
            .expect("run");

        assert_eq!(report.recently_edited, 1);
        assert_eq!(report.pages[0].idle_minutes, Some(30));
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn clean_sandbox_is_unchanged() {
        let mut wiki =
            MockWiki::default().with_content("Project:Sandbox", CLEAN, "2026-01-01T00:00:00Z");

        let report = reset_sandboxes_with_api(&mut wiki, &options(false), Some(("bot", "pw")), now())
            .expect("run");

        assert_eq!(report.unchanged, 1);
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn missing_sandbox_is_recreated() {
        let mut wiki = MockWiki::default();

        let report = reset_sandboxes_with_api(&mut wiki, &options(false), Some(("bot", "pw")), now())
            .expect("run");

        assert_eq!(report.reset, 1);
        assert_eq!(report.pages[0].detail.as_deref(), Some("page was missing"));
        assert_eq!(wiki.content_of("Project:Sandbox"), Some(CLEAN));
    }

    #[test]
    fn dry_run_does_not_edit() {
        let mut wiki = MockWiki::default().with_content(
            "Project:Sandbox",
            "test edit",
            "2026-10-15T10:00:00Z",
        );

        let report = reset_sandboxes_with_api(&mut wiki, &options(true), None, now()).expect("run");

        assert_eq!(report.pages[0].action, "would_reset");
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn minutes_since_handles_offsets_and_garbage() {
        assert_eq!(minutes_since("2026-10-16T13:00:00+02:00", now()), Some(60));
        assert_eq!(minutes_since("yesterday", now()), None);
    }
}
