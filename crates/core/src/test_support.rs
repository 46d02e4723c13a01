// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers and proptest strategies.

pub mod strategies {
    use crate::job::JobState;
    use crate::options::{BackoffPolicy, JobOptions, KeepPolicy};
    use proptest::prelude::*;

    pub fn arb_job_state() -> impl Strategy<Value = JobState> {
        prop_oneof![
            Just(JobState::Waiting),
            Just(JobState::WaitingChildren),
            Just(JobState::Delayed),
            Just(JobState::Active),
            Just(JobState::Completed),
            Just(JobState::Failed),
            Just(JobState::Paused),
        ]
    }

    pub fn arb_keep_policy() -> impl Strategy<Value = KeepPolicy> {
        prop_oneof![
            Just(KeepPolicy::KeepAll),
            Just(KeepPolicy::Remove),
            (1u64..10_000).prop_map(KeepPolicy::Last),
        ]
    }

    pub fn arb_backoff() -> impl Strategy<Value = BackoffPolicy> {
        prop_oneof![
            Just(BackoffPolicy::None),
            (1u64..100_000).prop_map(|delay| BackoffPolicy::Fixed { delay }),
            (1u64..100_000).prop_map(|delay| BackoffPolicy::Exponential { delay }),
        ]
    }

    prop_compose! {
        pub fn arb_job_options()(
            priority in 0i64..100,
            delay in 0u64..1_000_000,
            lifo in any::<bool>(),
            attempts in 1u32..10,
            backoff in arb_backoff(),
            remove_on_complete in arb_keep_policy(),
            remove_on_fail in arb_keep_policy(),
        ) -> JobOptions {
            JobOptions {
                priority,
                delay,
                lifo,
                attempts,
                backoff,
                remove_on_complete,
                remove_on_fail,
                ..JobOptions::default()
            }
        }
    }
}
