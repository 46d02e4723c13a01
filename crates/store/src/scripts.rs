// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The atomic transition scripts.
//!
//! Every script is embedded at compile time and invoked through
//! [`redis::Script`], which handles EVALSHA caching with an EVAL
//! fallback on a cold script cache. Variant selection (LPOS vs list
//! scan) happens once here, not per call.

use crate::version::ServerVersion;
use redis::Script;

/// Registry of loaded scripts for one server version.
#[derive(Clone)]
pub struct ScriptRegistry {
    pub add_job: Script,
    pub move_to_active: Script,
    pub extend_lock: Script,
    pub move_to_finished: Script,
    pub move_to_delayed: Script,
    pub move_to_waiting_children: Script,
    pub promote: Script,
    pub update_delay_set: Script,
    pub pause: Script,
    pub remove_job: Script,
    pub clean_jobs_in_set: Script,
    pub obliterate: Script,
    pub reprocess_job: Script,
    pub retry_job: Script,
    pub move_stalled_jobs_to_wait: Script,
    pub get_state: Script,
    pub drain: Script,
    pub update_progress: Script,
}

impl ScriptRegistry {
    /// Load the script set appropriate for `version`.
    pub fn for_version(version: ServerVersion) -> Self {
        let lpos = version.supports_lpos();
        Self {
            add_job: Script::new(include_str!("../lua/add_job.lua")),
            move_to_active: Script::new(include_str!("../lua/move_to_active.lua")),
            extend_lock: Script::new(include_str!("../lua/extend_lock.lua")),
            move_to_finished: Script::new(if lpos {
                include_str!("../lua/move_to_finished.lua")
            } else {
                include_str!("../lua/move_to_finished_legacy.lua")
            }),
            move_to_delayed: Script::new(include_str!("../lua/move_to_delayed.lua")),
            move_to_waiting_children: Script::new(include_str!(
                "../lua/move_to_waiting_children.lua"
            )),
            promote: Script::new(include_str!("../lua/promote.lua")),
            update_delay_set: Script::new(include_str!("../lua/update_delay_set.lua")),
            pause: Script::new(include_str!("../lua/pause.lua")),
            remove_job: Script::new(include_str!("../lua/remove_job.lua")),
            clean_jobs_in_set: Script::new(include_str!("../lua/clean_jobs_in_set.lua")),
            obliterate: Script::new(include_str!("../lua/obliterate.lua")),
            reprocess_job: Script::new(include_str!("../lua/reprocess_job.lua")),
            retry_job: Script::new(include_str!("../lua/retry_job.lua")),
            move_stalled_jobs_to_wait: Script::new(include_str!(
                "../lua/move_stalled_jobs_to_wait.lua"
            )),
            get_state: Script::new(if lpos {
                include_str!("../lua/get_state_v2.lua")
            } else {
                include_str!("../lua/get_state.lua")
            }),
            drain: Script::new(include_str!("../lua/drain.lua")),
            update_progress: Script::new(include_str!("../lua/update_progress.lua")),
        }
    }
}

#[cfg(test)]
#[path = "scripts_tests.rs"]
mod tests;
