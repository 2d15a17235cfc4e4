use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use similar::TextDiff;

use crate::client::{EditOptions, MediaWikiClient, MediaWikiClientConfig, NS_MAIN, WikiReadApi, WikiWriteApi};
use crate::config::BotConfig;
use crate::interlang::{DroppedLink, InterlangPattern, normalize_interlanguage_footer};
use crate::remote::{HttpConnector, RemoteConnector, RemoteHandles};

pub const INTERLANG_SUMMARY: &str = "Normalize and repair interlanguage links.";
pub const WITHOUT_INTERWIKI_REPORT: &str = "Withoutinterwiki";

#[derive(Debug, Clone)]
pub struct InterlangFixOptions {
    /// Explicit pages to process. When empty, every main-namespace page not
    /// listed in the Withoutinterwiki report is processed.
    pub titles: Vec<String>,
    pub max_depth: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterlangPageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
    pub resolved: BTreeMap<String, String>,
    pub dropped: Vec<DroppedLink>,
    pub diff: Option<String>,
}

impl InterlangPageResult {
    fn skipped(title: &str, action: &str, detail: &str) -> Self {
        Self {
            title: title.to_string(),
            action: action.to_string(),
            detail: Some(detail.to_string()),
            resolved: BTreeMap::new(),
            dropped: Vec::new(),
            diff: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct InterlangFixReport {
    pub success: bool,
    pub dry_run: bool,
    pub candidates: usize,
    pub edited: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub pages: Vec<InterlangPageResult>,
    pub request_count: usize,
}

pub fn fix_interlanguage_links(
    config: &BotConfig,
    options: &InterlangFixOptions,
) -> Result<InterlangFixReport> {
    let pattern = InterlangPattern::new(config.allowed_langs())?;
    let client_config = MediaWikiClientConfig::from_config(config);
    let connector = HttpConnector::new(client_config.clone(), config.interlang.auth.clone());
    let mut handles = RemoteHandles::new(connector, config.interlang.sites.clone());

    let username = config.bot_name();
    let password = if options.dry_run {
        None
    } else {
        Some(config.bot_password()?)
    };
    let credentials = password
        .as_deref()
        .map(|password| (username.as_str(), password));

    let mut client = MediaWikiClient::new(client_config)?;
    fix_interlanguage_links_with_api(&mut client, &mut handles, &pattern, options, credentials)
}

pub fn fix_interlanguage_links_with_api<A: WikiWriteApi, C: RemoteConnector>(
    api: &mut A,
    handles: &mut RemoteHandles<C>,
    pattern: &InterlangPattern,
    options: &InterlangFixOptions,
    credentials: Option<(&str, &str)>,
) -> Result<InterlangFixReport> {
    if let Some((username, password)) = credentials {
        api.login(username, password)
            .context("interlanguage fix login failed")?;
    }

    let candidates = collect_candidates(api, &options.titles)?;
    tracing::info!(count = candidates.len(), "interlanguage fix candidates collected");

    let mut report = InterlangFixReport {
        dry_run: options.dry_run,
        candidates: candidates.len(),
        ..Default::default()
    };

    for title in candidates {
        match process_page(api, handles, pattern, &title, options) {
            Ok(result) => {
                match result.action.as_str() {
                    "edited" | "would_edit" => report.edited += 1,
                    "unchanged" => report.unchanged += 1,
                    _ => report.skipped += 1,
                }
                report.pages.push(result);
            }
            Err(error) => {
                tracing::error!(title = %title, stage = "interlang", error = %error, "interlanguage fix failed");
                report.errors.push(format!("{title}: {error}"));
                report
                    .pages
                    .push(InterlangPageResult::skipped(&title, "error", &error.to_string()));
            }
        }
    }

    report.success = report.errors.is_empty();
    report.request_count = api.request_count();
    Ok(report)
}

fn process_page<A: WikiWriteApi, C: RemoteConnector>(
    api: &mut A,
    handles: &mut RemoteHandles<C>,
    pattern: &InterlangPattern,
    title: &str,
    options: &InterlangFixOptions,
) -> Result<InterlangPageResult> {
    tracing::info!(title, "processing page");
    let Some(content) = api
        .get_page_content(title)
        .with_context(|| format!("failed to load {title}"))?
    else {
        return Ok(InterlangPageResult::skipped(title, "skip_missing", "page not found"));
    };
    // Piped tokens are not entries; a page holding only those is left alone.
    if pattern.extract_entries(&content).is_empty() {
        return Ok(InterlangPageResult::skipped(
            title,
            "skip_no_links",
            "no interlanguage links for allowed languages",
        ));
    }

    let normalized = normalize_interlanguage_footer(&content, pattern, |entry| {
        tracing::debug!(lang = %entry.lang, title = %entry.title, anchor = ?entry.anchor, "checking interlanguage link");
        handles.resolve(&entry.lang, &entry.title, options.max_depth)
    });
    for link in &normalized.dropped {
        tracing::info!(lang = %link.lang, title = %link.title, outcome = link.outcome, "dropping unresolved link");
    }

    let mut result = InterlangPageResult {
        title: title.to_string(),
        action: "unchanged".to_string(),
        detail: None,
        resolved: normalized.resolved.clone(),
        dropped: normalized.dropped.clone(),
        diff: None,
    };
    if !normalized.changed {
        tracing::info!(title, "footer already canonical");
        return Ok(result);
    }

    if options.dry_run {
        result.action = "would_edit".to_string();
        result.diff = Some(
            TextDiff::from_lines(content.as_str(), normalized.text.as_str())
                .unified_diff()
                .context_radius(2)
                .header(title, "normalized")
                .to_string(),
        );
        return Ok(result);
    }

    let outcome = api
        .edit_page(title, &normalized.text, &EditOptions::new(INTERLANG_SUMMARY, None))
        .with_context(|| format!("failed to save {title}"))?;
    tracing::info!(title, revision = ?outcome.new_revision_id, "interlanguage footer updated");
    result.action = "edited".to_string();
    Ok(result)
}

fn collect_candidates<A: WikiReadApi + ?Sized>(api: &mut A, titles: &[String]) -> Result<Vec<String>> {
    if !titles.is_empty() {
        let mut seen = HashSet::new();
        return Ok(titles
            .iter()
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty() && seen.insert(title.clone()))
            .collect());
    }

    let without: HashSet<String> = api
        .get_query_page(WITHOUT_INTERWIKI_REPORT)
        .context("failed to load Withoutinterwiki report")?
        .into_iter()
        .collect();
    let all_pages = api
        .get_all_pages(NS_MAIN)
        .context("failed to list main namespace pages")?;
    tracing::info!(
        without_interwiki = without.len(),
        total = all_pages.len(),
        "main namespace listed"
    );
    Ok(all_pages
        .into_iter()
        .filter(|title| !without.contains(title))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{INTERLANG_SUMMARY, InterlangFixOptions, fix_interlanguage_links_with_api};
    use crate::interlang::InterlangPattern;
    use crate::remote::RemoteHandles;
    use crate::test_support::{MockConnector, MockWiki};

    const VI_URL: &str = "https://vi.example.org/w/api.php";
    const ZH_URL: &str = "https://zh.example.org/api.php";

    fn handles(vi: MockWiki, zh: Option<MockWiki>) -> RemoteHandles<MockConnector> {
        let mut connector = MockConnector::default().with_wiki(VI_URL, vi);
        if let Some(zh) = zh {
            connector = connector.with_wiki(ZH_URL, zh);
        }
        RemoteHandles::new(
            connector,
            BTreeMap::from([
                ("vi".to_string(), VI_URL.to_string()),
                ("zh".to_string(), ZH_URL.to_string()),
            ]),
        )
    }

    fn options(titles: &[&str], dry_run: bool) -> InterlangFixOptions {
        InterlangFixOptions {
            titles: titles.iter().map(ToString::to_string).collect(),
            max_depth: 20,
            dry_run,
        }
    }

    fn pattern() -> InterlangPattern {
        InterlangPattern::new(["vi", "zh"]).expect("pattern")
    }

    #[test]
    fn redirected_foreign_title_is_rewritten() {
        let mut local = MockWiki::default().with_content(
            "喜羊羊",
            "Article body.\n[[vi:Old Name]]",
            "2026-01-01T00:00:00Z",
        );
        let vi = MockWiki::default()
            .with_redirect("Old Name", "New Name")
            .with_page("New Name");
        let mut remote = handles(vi, None);

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["喜羊羊"], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert!(report.success);
        assert_eq!(report.edited, 1);
        assert_eq!(local.content_of("喜羊羊"), Some("Article body.\n[[vi:New Name]]"));
        assert_eq!(local.edits[0].options.summary, INTERLANG_SUMMARY);
        assert!(local.edits[0].options.tag.is_none());
    }

    #[test]
    fn canonical_page_is_not_written() {
        let mut local = MockWiki::default().with_content(
            "Page",
            "Body\n[[vi:Hà Nội]][[zh:北京]]",
            "2026-01-01T00:00:00Z",
        );
        let mut remote = handles(
            MockWiki::default().with_page("Hà Nội"),
            Some(MockWiki::default().with_page("北京")),
        );

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["Page"], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert_eq!(report.unchanged, 1);
        assert!(local.edits.is_empty());
    }

    #[test]
    fn unreachable_language_is_dropped_and_others_kept() {
        let mut local = MockWiki::default().with_content(
            "Page",
            "Body\n[[zh:北京]][[vi:Hà Nội]]",
            "2026-01-01T00:00:00Z",
        );
        let mut remote = handles(MockWiki::default().with_page("Hà Nội"), None);

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["Page"], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert_eq!(report.pages[0].dropped.len(), 1);
        assert_eq!(report.pages[0].dropped[0].outcome, "error");
        assert_eq!(local.content_of("Page"), Some("Body\n[[vi:Hà Nội]]"));
    }

    #[test]
    fn pages_without_links_or_missing_are_skipped() {
        let mut local = MockWiki::default().with_content("Plain", "No links here.", "2026-01-01T00:00:00Z");
        let mut remote = handles(MockWiki::default(), None);

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["Plain", "Absent"], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert_eq!(report.skipped, 2);
        assert_eq!(report.pages[0].action, "skip_no_links");
        assert_eq!(report.pages[1].action, "skip_missing");
        assert!(local.edits.is_empty());
    }

    #[test]
    fn page_with_only_piped_links_is_not_written() {
        let mut local = MockWiki::default().with_content(
            "Page",
            "Body\n[[zh:北京|显示文本]]",
            "2026-01-01T00:00:00Z",
        );
        let mut remote = handles(MockWiki::default(), Some(MockWiki::default().with_page("北京")));

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["Page"], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert_eq!(report.pages[0].action, "skip_no_links");
        assert!(local.edits.is_empty());
        assert_eq!(local.content_of("Page"), Some("Body\n[[zh:北京|显示文本]]"));
        assert!(remote.cached_langs().is_empty());
    }

    #[test]
    fn default_candidates_exclude_withoutinterwiki() {
        let mut local = MockWiki::default()
            .with_content("Linked", "Body\n[[vi:A]]", "2026-01-01T00:00:00Z")
            .with_content("Lonely", "Body", "2026-01-01T00:00:00Z")
            .with_query_page("Withoutinterwiki", &["Lonely"]);
        local.main_namespace = vec!["Linked".to_string(), "Lonely".to_string()];
        let mut remote = handles(MockWiki::default().with_page("A"), None);

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&[], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert_eq!(report.candidates, 1);
        assert_eq!(report.pages[0].title, "Linked");
    }

    #[test]
    fn dry_run_reports_diff_without_editing() {
        let mut local = MockWiki::default().with_content(
            "Page",
            "Body\n[[vi:Old Name]]",
            "2026-01-01T00:00:00Z",
        );
        let mut remote = handles(
            MockWiki::default()
                .with_redirect("Old Name", "New Name")
                .with_page("New Name"),
            None,
        );

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["Page"], true),
            None,
        )
        .expect("run");

        assert_eq!(report.edited, 1);
        assert!(local.edits.is_empty());
        let diff = report.pages[0].diff.as_deref().expect("diff");
        assert!(diff.contains("-[[vi:Old Name]]"));
        assert!(diff.contains("+[[vi:New Name]]"));
    }

    #[test]
    fn page_read_failure_is_recorded_and_run_continues() {
        let mut local = MockWiki::default()
            .with_content("Good", "Body\n[[vi:B]]\n", "2026-01-01T00:00:00Z")
            .failing_on("Bad");
        let mut remote = handles(MockWiki::default().with_page("B"), None);

        let report = fix_interlanguage_links_with_api(
            &mut local,
            &mut remote,
            &pattern(),
            &options(&["Bad", "Good"], false),
            Some(("Hoohu-bot", "pw")),
        )
        .expect("run");

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.pages[0].action, "error");
        assert_eq!(report.pages[1].action, "unchanged");
    }
}
