// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate-limiter configuration and group-key resolution.
//!
//! A limiter caps how many jobs may enter `active` per rolling window.
//! With `group_path` set, the value at that dotted path in the JSON
//! payload picks a per-group counter instead of the queue-wide one; the
//! group is resolved at `add` time and travels in the job options.

use serde::{Deserialize, Serialize};

/// Token-bucket configuration for a queue or its groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterOptions {
    /// Tokens per window.
    pub max: u32,
    /// Window length in milliseconds.
    pub duration_ms: u64,
    /// Dotted path into the payload naming the group value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_path: Option<String>,
}

impl RateLimiterOptions {
    pub fn new(max: u32, duration_ms: u64) -> Self {
        Self { max, duration_ms, group_path: None }
    }

    crate::setters! {
        option {
            group_path: String,
        }
    }

    /// Resolve the group for a payload, when grouping is configured.
    /// String and number leaves are accepted; anything else is ignored
    /// and the job falls back to the queue-wide counter.
    pub fn resolve_group(&self, payload: &serde_json::Value) -> Option<String> {
        let path = self.group_path.as_deref()?;
        let mut cursor = payload;
        for segment in path.split('.') {
            cursor = cursor.get(segment)?;
        }
        match cursor {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Append the group to a job id, `<id>:<group>`, so limiter accounting
/// can be recovered from the id alone inside the scripts.
pub fn group_suffixed_id(id: &str, group: &str) -> String {
    format!("{}:{}", id, group)
}

/// Group carried in an id built by [`group_suffixed_id`]. The segment
/// after the last colon; bare numeric ids have none.
pub fn group_of_id(id: &str) -> Option<&str> {
    match id.rsplit_once(':') {
        Some((_, group)) if !group.is_empty() => Some(group),
        _ => None,
    }
}

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;
