//! Subscription expressions and tag filtering
//!
//! An expression is either the match-all marker (`*` or an empty string) or
//! a `||`-separated list of literal tags. The broker filters coarsely by tag
//! hash code; the client re-filters by exact tag string after each pull.

use crate::error::ConfigError;
use std::collections::HashSet;

/// Expression matching every message
pub const SUB_ALL: &str = "*";

/// Parsed subscription for one topic
#[derive(Debug, Clone)]
pub struct SubscriptionData {
    pub topic: String,
    /// Raw expression as passed to subscribe, re-sent to the broker on pull
    pub expression: String,
    /// Distinct tags; empty means match-all
    pub tags_set: HashSet<String>,
    /// 32-bit hashes of the tags, used by the broker's coarse filter
    pub code_set: HashSet<i32>,
    pub class_filter_mode: bool,
    /// Construction timestamp; lets the broker detect stale subscription data
    pub sub_version: i64,
}

impl SubscriptionData {
    /// Parse `expression` for `topic`.
    ///
    /// `*` and the empty string subscribe to everything. Anything else must
    /// split on `||` into at least one non-empty tag, otherwise the
    /// expression is rejected.
    pub fn parse(topic: &str, expression: &str) -> Result<Self, ConfigError> {
        let trimmed = expression.trim();
        let mut sub = Self {
            topic: topic.to_string(),
            expression: if trimmed.is_empty() { SUB_ALL } else { trimmed }.to_string(),
            tags_set: HashSet::new(),
            code_set: HashSet::new(),
            class_filter_mode: false,
            sub_version: chrono::Utc::now().timestamp_millis(),
        };

        if trimmed.is_empty() || trimmed == SUB_ALL {
            return Ok(sub);
        }

        for tag in trimmed.split("||").map(str::trim).filter(|t| !t.is_empty()) {
            sub.code_set.insert(java_string_hash(tag));
            sub.tags_set.insert(tag.to_string());
        }

        if sub.tags_set.is_empty() {
            return Err(ConfigError::bad_expression(topic, expression));
        }
        Ok(sub)
    }

    /// True when the expression matches everything
    pub fn is_sub_all(&self) -> bool {
        self.tags_set.is_empty()
    }

    /// Client-side exact-tag filter. Match-all and class-filter
    /// subscriptions keep every message.
    pub fn matches_tag(&self, tags: Option<&str>) -> bool {
        if self.is_sub_all() || self.class_filter_mode {
            return true;
        }
        match tags {
            Some(t) => self.tags_set.contains(t),
            None => false,
        }
    }

    /// Re-stamp the version on re-subscribe so the broker sees the change.
    pub fn bump_version(&mut self) {
        self.sub_version = chrono::Utc::now().timestamp_millis();
    }
}

/// 31-multiplier rolling hash over UTF-16 code units, identical to Java's
/// `String.hashCode`. The broker computes the same value server-side; any
/// divergence breaks its coarse tag filter.
pub fn java_string_hash(s: &str) -> i32 {
    let mut h: i32 = 0;
    for unit in s.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    h
}
