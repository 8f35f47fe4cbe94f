//! Keyword and regex filtering of feed items.
//!
//! A [`FilterRule`] is built once at configuration load and applied to
//! every request. Keyword rules match whole comma-separated tokens
//! case-insensitively; regex rules run a case-sensitive search over the
//! raw keywords text. Malformed rules are rejected when the rule is
//! built, never at filter time.

use std::collections::HashSet;

use thiserror::Error;

use crate::feed::document::{FeedDocument, FeedItem};

/// Errors surfaced while building a [`FilterRule`].
#[derive(Debug, Error)]
pub enum FilterError {
    /// Neither include nor exclude tokens remained after normalization.
    #[error("filter rule has no usable include or exclude tokens")]
    EmptyRule,

    /// The regex pattern failed to compile.
    #[error("invalid filter regex: {0}")]
    BadRegex(#[from] regex::Error),
}

/// A compiled, immutable per-feed filter.
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Whole-token matching against the item's keyword list. An item is
    /// retained when it carries at least one include token (if any are
    /// configured) and none of the exclude tokens. Exclude wins when a
    /// single item matches both.
    Keywords {
        include: HashSet<String>,
        exclude: HashSet<String>,
    },
    /// Unanchored search over the raw keywords text. Items without a
    /// keywords field never match.
    Regex(regex::Regex),
}

impl FilterRule {
    /// Builds a keyword rule from raw token lists.
    ///
    /// Tokens are trimmed and lowercased; empty tokens are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::EmptyRule`] when normalization leaves both
    /// lists empty.
    pub fn keywords(include: &[String], exclude: &[String]) -> Result<Self, FilterError> {
        let include = normalize(include);
        let exclude = normalize(exclude);
        if include.is_empty() && exclude.is_empty() {
            return Err(FilterError::EmptyRule);
        }
        Ok(FilterRule::Keywords { include, exclude })
    }

    /// Compiles a regex rule.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::BadRegex`] when the pattern does not
    /// compile.
    pub fn regex(pattern: &str) -> Result<Self, FilterError> {
        Ok(FilterRule::Regex(regex::Regex::new(pattern)?))
    }

    /// Whether the rule retains `item`.
    pub fn matches(&self, item: &FeedItem) -> bool {
        match self {
            FilterRule::Keywords { include, exclude } => {
                let tokens: Vec<String> = item.keyword_tokens().collect();
                if !include.is_empty() && !tokens.iter().any(|t| include.contains(t)) {
                    return false;
                }
                if !exclude.is_empty() && tokens.iter().any(|t| exclude.contains(t)) {
                    return false;
                }
                true
            }
            FilterRule::Regex(pattern) => match item.keywords.as_deref() {
                Some(text) => pattern.is_match(text),
                None => false,
            },
        }
    }
}

fn normalize(tokens: &[String]) -> HashSet<String> {
    tokens
        .iter()
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Drops every item the rule rejects, keeping survivors in upstream
/// order. Returns the number of items removed.
pub fn apply(doc: &mut FeedDocument, rule: &FilterRule) -> usize {
    let removed = doc.retain_items(|item| {
        let keep = rule.matches(item);
        if !keep {
            tracing::debug!(
                title = item.title.as_deref().unwrap_or("untitled"),
                keywords = item.keywords.as_deref().unwrap_or(""),
                "filtering out item"
            );
        }
        keep
    });
    tracing::info!(removed, remaining = doc.item_count(), "filtered feed");
    removed
}
