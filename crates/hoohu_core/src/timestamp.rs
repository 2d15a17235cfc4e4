use anyhow::{Context, Result};
use serde::Serialize;

use crate::client::{ChangeTag, EditOptions, MediaWikiClient, MediaWikiClientConfig, WikiWriteApi};
use crate::config::BotConfig;

pub const TIMESTAMP_TEXT: &str = "~~~~~";
pub const TIMESTAMP_SUMMARY: &str = "Daily timestamp print.";

#[derive(Debug, Clone, Serialize)]
pub struct TimestampReport {
    pub title: String,
    pub action: String,
    pub dry_run: bool,
    pub new_revision_id: Option<i64>,
    pub nochange: bool,
    pub request_count: usize,
}

pub fn print_timestamp(config: &BotConfig, dry_run: bool) -> Result<TimestampReport> {
    let page = config.timestamp_page();
    if dry_run {
        tracing::info!(title = %page, "dry run; timestamp not written");
        return Ok(TimestampReport {
            title: page,
            action: "would_edit".to_string(),
            dry_run: true,
            new_revision_id: None,
            nochange: false,
            request_count: 0,
        });
    }

    let username = config.bot_name();
    let password = config.bot_password()?;
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    print_timestamp_with_api(&mut client, &page, (&username, &password))
}

pub fn print_timestamp_with_api<A: WikiWriteApi>(
    api: &mut A,
    page: &str,
    credentials: (&str, &str),
) -> Result<TimestampReport> {
    let (username, password) = credentials;
    api.login(username, password)
        .context("timestamp login failed")?;

    let outcome = api
        .edit_page(
            page,
            TIMESTAMP_TEXT,
            &EditOptions::new(TIMESTAMP_SUMMARY, Some(ChangeTag::Daily)),
        )
        .with_context(|| format!("failed to write timestamp to {page}"))?;
    tracing::info!(title = page, revision = ?outcome.new_revision_id, "timestamp printed");

    Ok(TimestampReport {
        title: outcome.title,
        action: "edited".to_string(),
        dry_run: false,
        new_revision_id: outcome.new_revision_id,
        nochange: outcome.nochange,
        request_count: api.request_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::{TIMESTAMP_SUMMARY, TIMESTAMP_TEXT, print_timestamp, print_timestamp_with_api};
    use crate::client::ChangeTag;
    use crate::config::BotConfig;
    use crate::error::BotError;
    use crate::test_support::MockWiki;

    #[test]
    fn timestamp_is_written_with_daily_tag() {
        let mut wiki = MockWiki::default();
        let report = print_timestamp_with_api(&mut wiki, "User:Hoohu-bot/timestamp", ("Hoohu-bot", "pw"))
            .expect("run");

        assert_eq!(report.title, "User:Hoohu-bot/timestamp");
        assert_eq!(report.action, "edited");
        assert_eq!(wiki.edits.len(), 1);
        assert_eq!(wiki.edits[0].text, TIMESTAMP_TEXT);
        assert_eq!(wiki.edits[0].options.summary, TIMESTAMP_SUMMARY);
        assert_eq!(wiki.edits[0].options.tag, Some(ChangeTag::Daily));
    }

    #[test]
    fn rejected_login_writes_nothing() {
        let mut wiki = MockWiki {
            reject_login: true,
            ..Default::default()
        };
        let error = print_timestamp_with_api(&mut wiki, "User:Hoohu-bot/timestamp", ("Hoohu-bot", "bad"))
            .expect_err("must fail");
        assert!(matches!(error.downcast_ref::<BotError>(), Some(BotError::Auth(_))));
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn dry_run_needs_no_credentials() {
        let mut config = BotConfig::default();
        config.timestamp.page = Some("User:Hoohu-bot/clock".to_string());
        let report = print_timestamp(&config, true).expect("dry run");
        assert_eq!(report.title, "User:Hoohu-bot/clock");
        assert_eq!(report.action, "would_edit");
        assert_eq!(report.request_count, 0);
    }
}
