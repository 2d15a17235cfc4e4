//! Interlanguage link footer parsing and rebuilding.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;

use crate::error::BotError;
use crate::resolver::Resolution;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterlangEntry {
    pub lang: String,
    pub title: String,
    pub anchor: Option<String>,
}

impl InterlangEntry {
    fn target_with_anchor(&self, base: &str) -> String {
        match &self.anchor {
            Some(anchor) => format!("{base}#{anchor}"),
            None => base.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedLink {
    pub lang: String,
    pub title: String,
    pub outcome: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFooter {
    pub text: String,
    pub changed: bool,
    /// Lang code to `Title` or `Title#anchor`, as rendered in the footer.
    pub resolved: BTreeMap<String, String>,
    pub dropped: Vec<DroppedLink>,
}

/// Matcher for `[[lang:Target]]` tokens restricted to a fixed set of codes.
///
/// The code is matched case-insensitively; the rest of the token is not.
#[derive(Debug, Clone)]
pub struct InterlangPattern {
    langs: Vec<String>,
    token: Regex,
}

impl InterlangPattern {
    pub fn new<I, S>(langs: I) -> Result<Self, BotError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut codes: Vec<String> = langs
            .into_iter()
            .map(|lang| lang.as_ref().trim().to_ascii_lowercase())
            .filter(|lang| !lang.is_empty())
            .collect();
        codes.sort();
        codes.dedup();
        if codes.is_empty() {
            return Err(BotError::Config(
                "at least one interlanguage code must be configured".to_string(),
            ));
        }

        let alternatives = codes
            .iter()
            .map(|code| regex::escape(code))
            .collect::<Vec<_>>()
            .join("|");
        let token = Regex::new(&format!(r"\[\[((?i:{alternatives})):([^\]\n]+?)\]\]"))
            .map_err(|error| BotError::Config(format!("invalid interlanguage pattern: {error}")))?;

        Ok(Self {
            langs: codes,
            token,
        })
    }

    pub fn langs(&self) -> &[String] {
        &self.langs
    }

    /// First usable entry per language code, in order of appearance.
    ///
    /// Piped tokens are skipped without claiming their code, so a later bare
    /// token for the same code can still be used.
    pub fn extract_entries(&self, content: &str) -> Vec<InterlangEntry> {
        let mut entries: Vec<InterlangEntry> = Vec::new();
        for captures in self.token.captures_iter(content) {
            let lang = captures[1].to_ascii_lowercase();
            let raw = captures[2].trim();
            if raw.contains('|') {
                continue;
            }
            let (title, anchor) = match raw.split_once('#') {
                Some((title, anchor)) => {
                    let anchor = anchor.trim();
                    (
                        title.trim(),
                        (!anchor.is_empty()).then(|| anchor.to_string()),
                    )
                }
                None => (raw, None),
            };
            if title.is_empty() || entries.iter().any(|entry| entry.lang == lang) {
                continue;
            }
            entries.push(InterlangEntry {
                lang,
                title: title.to_string(),
                anchor,
            });
        }
        entries
    }

    /// Remove every allowed-code token, piped or not.
    ///
    /// Every line left blank is dropped, including blank lines that held no
    /// token. Trailing whitespace is trimmed from each line and the result
    /// carries no trailing newline.
    pub fn strip_links(&self, content: &str) -> String {
        content
            .split('\n')
            .map(|line| self.token.replace_all(line, "").trim_end().to_string())
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Render resolved links sorted by code with no separator.
pub fn build_footer(resolved: &BTreeMap<String, String>) -> String {
    resolved
        .iter()
        .map(|(lang, title)| format!("[[{lang}:{title}]]"))
        .collect()
}

/// Rebuild the interlanguage footer of `content`.
///
/// `resolve` is called once per extracted entry with the entry's base title;
/// only `Resolution::Exists` keeps a link. Performs no writes.
pub fn normalize_interlanguage_footer<F>(
    content: &str,
    pattern: &InterlangPattern,
    mut resolve: F,
) -> NormalizedFooter
where
    F: FnMut(&InterlangEntry) -> Resolution,
{
    let mut resolved = BTreeMap::new();
    let mut dropped = Vec::new();

    for entry in pattern.extract_entries(content) {
        match resolve(&entry) {
            Resolution::Exists { final_title, .. } => {
                resolved.insert(entry.lang.clone(), entry.target_with_anchor(&final_title));
            }
            other => dropped.push(DroppedLink {
                lang: entry.lang.clone(),
                title: entry.title.clone(),
                outcome: other.kind(),
            }),
        }
    }

    let cleaned = pattern.strip_links(content);
    let footer = build_footer(&resolved);
    let text = match (cleaned.is_empty(), footer.is_empty()) {
        (_, true) => cleaned,
        (true, false) => footer,
        (false, false) => format!("{cleaned}\n{footer}"),
    };
    let changed = text.trim() != content.trim();

    NormalizedFooter {
        text,
        changed,
        resolved,
        dropped,
    }
}
