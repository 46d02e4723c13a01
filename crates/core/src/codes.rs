// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integer result codes shared by every transition script.

/// Decoded script return code. Negative values are errors; the caller
/// maps them onto typed store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptCode {
    /// The transition applied.
    Ok,
    /// Nothing to do (e.g. no pending dependencies).
    Noop,
    /// The job hash does not exist.
    MissingKey,
    /// The lock is missing or held under a different token.
    MissingLock,
    /// The job is not in the set the transition expects.
    WrongState,
    /// The job still has unfinished children.
    PendingDependencies,
}

impl ScriptCode {
    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            1 => Some(ScriptCode::Ok),
            0 => Some(ScriptCode::Noop),
            -1 => Some(ScriptCode::MissingKey),
            -2 => Some(ScriptCode::MissingLock),
            -3 => Some(ScriptCode::WrongState),
            -4 => Some(ScriptCode::PendingDependencies),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ScriptCode::Ok => 1,
            ScriptCode::Noop => 0,
            ScriptCode::MissingKey => -1,
            ScriptCode::MissingLock => -2,
            ScriptCode::WrongState => -3,
            ScriptCode::PendingDependencies => -4,
        }
    }

    pub fn is_err(&self) -> bool {
        self.code() < 0
    }
}

crate::simple_display! {
    ScriptCode {
        Ok => "ok",
        Noop => "noop",
        MissingKey => "missing key",
        MissingLock => "missing or bad lock",
        WrongState => "wrong state",
        PendingDependencies => "pending dependencies",
    }
}

#[cfg(test)]
#[path = "codes_tests.rs"]
mod tests;
