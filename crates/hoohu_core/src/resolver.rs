//! Canonical title resolution.
//!
//! Walks live redirects one hop at a time and falls back to the move log when
//! a title no longer exists, recording every title visited so callers can
//! report why a resolution ended where it did.

use std::collections::HashSet;

use serde::Serialize;

use crate::client::WikiReadApi;
use crate::error::BotError;

/// Outcome of resolving one title against one wiki.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Exists {
        final_title: String,
        chain: Vec<String>,
    },
    /// The walk came back to the title it started from.
    SelfRedirect { chain: Vec<String> },
    /// A title other than the start repeated.
    Loop { chain: Vec<String> },
    Missing { chain: Vec<String> },
    MaxDepthExceeded { chain: Vec<String> },
    Error { chain: Vec<String>, reason: String },
}

impl Resolution {
    pub fn chain(&self) -> &[String] {
        match self {
            Self::Exists { chain, .. }
            | Self::SelfRedirect { chain }
            | Self::Loop { chain }
            | Self::Missing { chain }
            | Self::MaxDepthExceeded { chain }
            | Self::Error { chain, .. } => chain,
        }
    }

    pub fn final_title(&self) -> Option<&str> {
        match self {
            Self::Exists { final_title, .. } => Some(final_title),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "exists",
            Self::SelfRedirect { .. } => "self",
            Self::Loop { .. } => "loop",
            Self::Missing { .. } => "missing",
            Self::MaxDepthExceeded { .. } => "max_depth",
            Self::Error { .. } => "error",
        }
    }

    /// The error this outcome represents when reported at a per-title boundary.
    pub fn failure(&self) -> Option<BotError> {
        let start = self.chain().first().cloned().unwrap_or_default();
        match self {
            Self::Exists { .. } => None,
            Self::SelfRedirect { .. } => Some(BotError::SelfReference { title: start }),
            Self::Loop { chain } => Some(BotError::Cycle {
                chain: chain.clone(),
            }),
            Self::Missing { chain } => Some(BotError::NotFound {
                title: chain.last().cloned().unwrap_or(start),
            }),
            Self::MaxDepthExceeded { chain } => Some(BotError::DepthExceeded {
                chain: chain.clone(),
                depth: chain.len(),
            }),
            Self::Error { reason, .. } => Some(BotError::Transport(reason.clone())),
        }
    }
}

pub fn normalize_title(title: &str) -> String {
    title.trim().to_string()
}

/// Resolve `start` to its current canonical title on the wiki behind `api`.
///
/// Issues at most two read queries per hop and never more than `max_depth`
/// hops. Query failures end the walk with `Resolution::Error`; nothing is
/// retried here.
pub fn resolve_title<A: WikiReadApi + ?Sized>(
    api: &mut A,
    start: &str,
    max_depth: usize,
) -> Resolution {
    let origin = normalize_title(start);
    let mut current = origin.clone();
    let mut seen = HashSet::new();
    let mut chain: Vec<String> = Vec::new();

    for _ in 0..max_depth {
        if seen.contains(&current) {
            chain.push(current.clone());
            if current == origin {
                return Resolution::SelfRedirect { chain };
            }
            return Resolution::Loop { chain };
        }
        seen.insert(current.clone());
        chain.push(current.clone());

        let probe = match api.query_redirect(&current) {
            Ok(probe) => probe,
            Err(error) => {
                tracing::warn!(title = %current, stage = "redirect_query", error = %error, "resolution query failed");
                return Resolution::Error {
                    chain,
                    reason: error.to_string(),
                };
            }
        };

        if let Some(target) = probe.redirect_target {
            let next = normalize_title(&target);
            if next == origin {
                chain.push(next);
                return Resolution::SelfRedirect { chain };
            }
            current = next;
            continue;
        }

        if probe.exists {
            return Resolution::Exists {
                final_title: current,
                chain,
            };
        }

        let events = match api.get_move_log(&current) {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(title = %current, stage = "move_log", error = %error, "resolution query failed");
                return Resolution::Error {
                    chain,
                    reason: error.to_string(),
                };
            }
        };
        // First event carrying a destination wins; the API lists newest first.
        let moved_to = events.into_iter().find_map(|event| {
            event
                .target_title
                .map(|title| normalize_title(&title))
                .filter(|title| !title.is_empty())
        });
        match moved_to {
            Some(target) => current = target,
            None => return Resolution::Missing { chain },
        }
    }

    Resolution::MaxDepthExceeded { chain }
}
