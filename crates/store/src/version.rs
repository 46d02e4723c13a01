// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server version detection.
//!
//! The version gates which script variants are loaded: list membership
//! probes use LPOS on 6.0.6+ and a list scan on older servers.

/// Parsed `redis_version` from `INFO server`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Extract the version from an `INFO server` reply.
    pub fn parse_info(info: &str) -> Option<Self> {
        let line = info.lines().find_map(|l| l.strip_prefix("redis_version:"))?;
        Self::parse(line.trim())
    }

    /// Parse a dotted version string such as `6.2.14`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self { major, minor, patch })
    }

    /// LPOS landed in 6.0.6.
    pub fn supports_lpos(&self) -> bool {
        *self >= ServerVersion::new(6, 0, 6)
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
