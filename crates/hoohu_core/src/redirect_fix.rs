use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::client::{ChangeTag, EditOptions, MediaWikiClient, MediaWikiClientConfig, WikiReadApi, WikiWriteApi};
use crate::config::BotConfig;
use crate::resolver::{Resolution, normalize_title, resolve_title};

pub const SELF_REDIRECT_MARKER: &str = "{{delete|Self-redirect.}}";
pub const BROKEN_REDIRECT_MARKER: &str = "{{delete|Broken redirect.}}";

#[derive(Debug, Clone)]
pub struct RedirectFixOptions {
    pub reports: Vec<String>,
    pub extra_titles: Vec<String>,
    pub max_depth: usize,
    pub dry_run: bool,
}

impl RedirectFixOptions {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            reports: config.redirect.reports.clone(),
            extra_titles: Vec::new(),
            max_depth: config.redirect.max_depth,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedirectAction {
    Retarget { target: String },
    MarkSelfRedirect,
    MarkBroken,
    Unchanged,
    SkipNotRedirect,
    SkipMissing,
}

impl RedirectAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retarget { .. } => "retarget",
            Self::MarkSelfRedirect => "mark_self_redirect",
            Self::MarkBroken => "mark_broken",
            Self::Unchanged => "unchanged",
            Self::SkipNotRedirect => "skip_not_redirect",
            Self::SkipMissing => "skip_missing",
        }
    }

    /// Replacement text and edit options, or `None` when nothing is written.
    pub fn edit(&self) -> Option<(String, EditOptions)> {
        let (text, summary) = match self {
            Self::Retarget { target } => (
                format!("#REDIRECT [[{target}]]"),
                format!("Fix redirect → [[{target}]]."),
            ),
            Self::MarkSelfRedirect => (
                SELF_REDIRECT_MARKER.to_string(),
                "Mark self-redirect for deletion.".to_string(),
            ),
            Self::MarkBroken => (
                BROKEN_REDIRECT_MARKER.to_string(),
                "Mark broken redirect for deletion.".to_string(),
            ),
            Self::Unchanged | Self::SkipNotRedirect | Self::SkipMissing => return None,
        };
        Some((text, EditOptions::new(summary, Some(ChangeTag::Redirect))))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedirectPlan {
    pub action: RedirectAction,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedirectPageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RedirectFixReport {
    pub success: bool,
    pub dry_run: bool,
    pub candidates: usize,
    pub retargeted: usize,
    pub marked_self: usize,
    pub marked_broken: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub pages: Vec<RedirectPageResult>,
    pub request_count: usize,
}

pub fn fix_redirects(config: &BotConfig, options: &RedirectFixOptions) -> Result<RedirectFixReport> {
    let username = config.bot_name();
    let password = if options.dry_run {
        None
    } else {
        Some(config.bot_password()?)
    };
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    let credentials = password
        .as_deref()
        .map(|password| (username.as_str(), password));
    fix_redirects_with_api(&mut client, options, credentials)
}

pub fn fix_redirects_with_api<A: WikiWriteApi>(
    api: &mut A,
    options: &RedirectFixOptions,
    credentials: Option<(&str, &str)>,
) -> Result<RedirectFixReport> {
    if let Some((username, password)) = credentials {
        api.login(username, password)
            .context("redirect fix login failed")?;
    }

    let candidates = collect_candidates(api, &options.reports, &options.extra_titles)?;
    tracing::info!(count = candidates.len(), "redirect fix candidates collected");

    let mut report = RedirectFixReport {
        dry_run: options.dry_run,
        candidates: candidates.len(),
        ..Default::default()
    };

    for title in candidates {
        let plan = match plan_redirect_fix(api, &title, options.max_depth) {
            Ok(plan) => plan,
            Err(error) => {
                tracing::error!(title = %title, stage = "plan", error = %error, "redirect fix failed");
                report.errors.push(format!("{title}: {error}"));
                report.pages.push(RedirectPageResult {
                    title,
                    action: "error".to_string(),
                    detail: Some(error.to_string()),
                    resolution: None,
                });
                continue;
            }
        };

        let action_name = plan.action.as_str();
        let mut detail = match &plan.action {
            RedirectAction::Retarget { target } => Some(format!("→ {target}")),
            _ => plan.resolution.as_ref().map(|resolution| resolution.chain().join(" → ")),
        };

        if let Some((text, edit_options)) = plan.action.edit() {
            if options.dry_run {
                tracing::info!(title = %title, action = action_name, "dry run; edit skipped");
            } else if let Err(error) = api.edit_page(&title, &text, &edit_options) {
                tracing::error!(title = %title, stage = "edit", error = %error, "redirect fix edit failed");
                report.errors.push(format!("{title}: {error}"));
                detail = Some(error.to_string());
                report.pages.push(RedirectPageResult {
                    title,
                    action: "error".to_string(),
                    detail,
                    resolution: plan.resolution,
                });
                continue;
            } else {
                tracing::info!(title = %title, action = action_name, "redirect page updated");
            }
        } else {
            tracing::info!(title = %title, action = action_name, "no edit needed");
        }

        match plan.action {
            RedirectAction::Retarget { .. } => report.retargeted += 1,
            RedirectAction::MarkSelfRedirect => report.marked_self += 1,
            RedirectAction::MarkBroken => report.marked_broken += 1,
            RedirectAction::Unchanged => report.unchanged += 1,
            RedirectAction::SkipNotRedirect | RedirectAction::SkipMissing => report.skipped += 1,
        }
        report.pages.push(RedirectPageResult {
            title,
            action: action_name.to_string(),
            detail,
            resolution: plan.resolution,
        });
    }

    report.success = report.errors.is_empty();
    report.request_count = api.request_count();
    Ok(report)
}

/// Decide what to do with one redirect-fix candidate. Read-only.
pub fn plan_redirect_fix<A: WikiReadApi + ?Sized>(
    api: &mut A,
    title: &str,
    max_depth: usize,
) -> Result<RedirectPlan> {
    let title = normalize_title(title);
    let probe = api
        .query_redirect(&title)
        .with_context(|| format!("failed to probe {title}"))?;
    let immediate_target = probe.redirect_target.as_deref().map(normalize_title);

    match immediate_target.as_deref() {
        None if probe.exists => {
            return Ok(RedirectPlan {
                action: RedirectAction::SkipNotRedirect,
                resolution: None,
            });
        }
        Some(target) if target == title => {
            return Ok(RedirectPlan {
                action: RedirectAction::MarkSelfRedirect,
                resolution: None,
            });
        }
        _ => {}
    }

    let resolution = resolve_title(api, &title, max_depth);
    let action = match &resolution {
        Resolution::Exists { final_title, .. } if *final_title == title => {
            RedirectAction::MarkSelfRedirect
        }
        Resolution::Exists { final_title, .. }
            if immediate_target.as_deref() == Some(final_title.as_str()) =>
        {
            RedirectAction::Unchanged
        }
        Resolution::Exists { final_title, .. } => RedirectAction::Retarget {
            target: final_title.clone(),
        },
        Resolution::SelfRedirect { .. } => RedirectAction::MarkSelfRedirect,
        Resolution::Error { reason, .. } => {
            anyhow::bail!("resolution of {title} failed: {reason}");
        }
        Resolution::Missing { .. } | Resolution::Loop { .. } | Resolution::MaxDepthExceeded { .. } => {
            if immediate_target.is_none() {
                RedirectAction::SkipMissing
            } else {
                RedirectAction::MarkBroken
            }
        }
    };

    if let Some(failure) = resolution.failure() {
        tracing::debug!(title = %title, outcome = resolution.kind(), reason = %failure, "redirect did not resolve");
    }

    Ok(RedirectPlan {
        action,
        resolution: Some(resolution),
    })
}

fn collect_candidates<A: WikiReadApi + ?Sized>(
    api: &mut A,
    reports: &[String],
    extra_titles: &[String],
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for report in reports {
        let titles = api
            .get_query_page(report)
            .with_context(|| format!("failed to load {report} report"))?;
        tracing::info!(report = %report, count = titles.len(), "query-page report loaded");
        for title in titles {
            let title = normalize_title(&title);
            if !title.is_empty() && seen.insert(title.clone()) {
                candidates.push(title);
            }
        }
    }
    for title in extra_titles {
        let title = normalize_title(title);
        if !title.is_empty() && seen.insert(title.clone()) {
            candidates.push(title);
        }
    }
    Ok(candidates)
}
