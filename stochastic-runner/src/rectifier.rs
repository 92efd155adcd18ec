// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-of-session reconciliation of the raw result with group verdicts.
//!
//! Repeats inside a stochastic group may fail while the group as a whole meets
//! its threshold. The host sees those failures and reports a failed session.
//! The [`SessionRectifier`] turns that into a success when every failure was
//! absorbed by a group that passed.

use tracing::{debug, warn};

/// The decision recorded for one group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GroupDecision<'a> {
    /// The group key.
    pub group: &'a str,

    /// `Some(true)` if the group passed, `Some(false)` if it failed, `None` if
    /// it was never decided.
    pub decided: Option<bool>,
}

/// The raw signals the host produced for a session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionRectifier {
    /// Whether any individual invocation failed.
    pub raw_failed: bool,

    /// Whether any invocation outside a stochastic group failed.
    pub native_failed: bool,

    /// Whether the session ended before every invocation ran.
    pub aborted: bool,
}

/// The outcome of rectification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rectification {
    /// No stochastic groups existed: the raw result stands.
    Inert {
        /// Whether the session failed.
        failed: bool,
    },

    /// The raw result stands.
    Unchanged {
        /// Whether the session failed.
        failed: bool,
    },

    /// The raw failure was absorbed by groups that met their thresholds.
    Overridden,

    /// The raw result was a success but a group failed.
    Escalated,
}

impl Rectification {
    /// Returns true if the session passed after rectification.
    pub fn is_success(self) -> bool {
        match self {
            Self::Inert { failed } | Self::Unchanged { failed } => !failed,
            Self::Overridden => true,
            Self::Escalated => false,
        }
    }
}

impl SessionRectifier {
    /// Reconciles the raw result with the group decisions.
    ///
    /// Undecided groups count as failed.
    pub fn rectify<'a>(
        self,
        decisions: impl IntoIterator<Item = GroupDecision<'a>>,
    ) -> Rectification {
        let mut groups = 0;
        let mut failed_groups = 0;
        for decision in decisions {
            groups += 1;
            match decision.decided {
                Some(true) => {}
                Some(false) => failed_groups += 1,
                None => {
                    warn!(
                        "stochastic group `{}` was not decided, counting it as failed",
                        decision.group
                    );
                    failed_groups += 1;
                }
            }
        }

        let raw_failed = self.raw_failed || self.aborted;
        if groups == 0 {
            debug!("no stochastic groups, leaving the session result alone");
            return Rectification::Inert { failed: raw_failed };
        }

        let absorbed = failed_groups == 0 && !self.native_failed && !self.aborted;
        match (absorbed, raw_failed) {
            (true, true) => {
                debug!("all {groups} stochastic groups passed, overriding the raw failure");
                Rectification::Overridden
            }
            (true, false) => Rectification::Unchanged { failed: false },
            (false, true) => Rectification::Unchanged { failed: true },
            (false, false) => {
                warn!("{failed_groups} stochastic groups failed although every invocation passed");
                Rectification::Escalated
            }
        }
    }
}
