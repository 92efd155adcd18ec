// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run-time control of stochastic groups.
//!
//! The [`ExecutionController`] is consulted around every physical invocation:
//!
//! 1. [`before_invocation`](ExecutionController::before_invocation) decides
//!    whether the invocation runs natively, runs as part of a group, or is
//!    skipped because its group is already decided.
//! 2. [`record_report`](ExecutionController::record_report) is called once
//!    per phase the host ran.
//! 3. [`after_invocation`](ExecutionController::after_invocation) folds the
//!    outcome into the group and decides it if possible.
//!
//! Each group moves from unseen, to accumulating, to decided. Once decided, a
//! group never changes.

use crate::{
    config::Policy,
    expander::InvocationName,
    rectifier::{GroupDecision, Rectification, SessionRectifier},
};
use std::{collections::BTreeMap, fmt};
use tracing::{debug, warn};

/// A phase of a physical invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Preparation before the test body.
    Setup,
    /// The test body.
    Call,
    /// Cleanup after the test body.
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => f.write_str("setup"),
            Self::Call => f.write_str("call"),
            Self::Teardown => f.write_str("teardown"),
        }
    }
}

/// The outcome of one phase of a physical invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PhaseReport {
    /// The phase that ran.
    pub phase: Phase,

    /// Whether the phase passed.
    pub passed: bool,
}

impl PhaseReport {
    /// A passing report for `phase`.
    pub fn pass(phase: Phase) -> Self {
        Self {
            phase,
            passed: true,
        }
    }

    /// A failing report for `phase`.
    pub fn fail(phase: Phase) -> Self {
        Self {
            phase,
            passed: false,
        }
    }
}

/// What to do with a physical invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Directive {
    /// The invocation is not part of a stochastic group: run it as usual.
    Native,

    /// Run the invocation and report its outcome.
    Run,

    /// Don't run the invocation: its group is decided.
    Skip {
        /// The decision of the group.
        group_passed: bool,
    },
}

/// The tally of a decided group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GroupVerdict {
    /// Whether the group met its threshold.
    pub passed: bool,

    /// The number of repeats that passed.
    pub passes: u32,

    /// The number of repeats that failed.
    pub fails: u32,

    /// The number of repeats the group was created with.
    pub out_of: u32,

    /// The number of passing repeats required.
    pub at_least: u32,
}

impl GroupVerdict {
    /// The number of repeats that actually ran.
    pub fn executed(&self) -> u32 {
        self.passes + self.fails
    }

    /// The number of passes short of the threshold.
    pub fn missing(&self) -> u32 {
        self.at_least.saturating_sub(self.passes)
    }
}

/// An event produced by the controller for a group.
#[derive(Clone, Copy, Debug)]
pub enum GroupEvent<'a> {
    /// The first invocation of a group was seen.
    Entered {
        /// The group key.
        group: &'a str,
        /// The group's policy.
        policy: &'a Policy,
    },

    /// A group was decided.
    Decided {
        /// The group key.
        group: &'a str,
        /// The group's policy.
        policy: &'a Policy,
        /// The final tally.
        verdict: GroupVerdict,
    },
}

#[derive(Debug)]
struct GroupState {
    policy: Policy,
    results: Vec<bool>,
    decided: Option<bool>,
}

impl GroupState {
    fn new(policy: Policy) -> Self {
        Self {
            policy,
            results: Vec::new(),
            decided: None,
        }
    }

    fn passes(&self) -> u32 {
        self.results.iter().filter(|passed| **passed).count() as u32
    }

    fn fails(&self) -> u32 {
        self.results.len() as u32 - self.passes()
    }

    /// Returns the decision that can be made from the results so far, if any.
    fn evaluate(&self) -> Option<bool> {
        let policy = &self.policy;
        let passes = self.passes();
        let fails = self.fails();

        if policy.pass_fast && passes >= policy.at_least {
            Some(true)
        } else if policy.fail_fast && i64::from(fails) > policy.allowed_failures() {
            Some(false)
        } else if self.results.len() as u32 >= policy.out_of {
            Some(passes >= policy.at_least)
        } else {
            None
        }
    }

    fn verdict(&self, passed: bool) -> GroupVerdict {
        GroupVerdict {
            passed,
            passes: self.passes(),
            fails: self.fails(),
            out_of: self.policy.out_of,
            at_least: self.policy.at_least,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    name: InvocationName,
    passed: bool,
}

/// Tracks stochastic groups across a session.
#[derive(Debug)]
pub struct ExecutionController {
    policies: BTreeMap<String, Policy>,
    groups: BTreeMap<String, GroupState>,
    in_flight: Option<InFlight>,
    native_failures: usize,
}

impl ExecutionController {
    /// Creates a controller for the given groups and their policies.
    pub fn new(policies: BTreeMap<String, Policy>) -> Self {
        Self {
            policies,
            groups: BTreeMap::new(),
            in_flight: None,
            native_failures: 0,
        }
    }

    /// Returns the number of groups registered with this controller.
    pub fn registered_count(&self) -> usize {
        self.policies.len()
    }

    /// Returns true if no groups are registered.
    pub fn is_inert(&self) -> bool {
        self.policies.is_empty()
    }

    /// Returns the number of native invocations that failed.
    pub fn native_failures(&self) -> usize {
        self.native_failures
    }

    /// Called before a physical invocation runs.
    pub fn before_invocation(
        &mut self,
        name: &InvocationName,
        mut emit: impl FnMut(GroupEvent<'_>),
    ) -> Directive {
        let group = name.group();
        if !name.is_stochastic() || !self.policies.contains_key(group) {
            self.start(name);
            return Directive::Native;
        }
        let policy = &self.policies[group];

        let state = self.groups.entry(group.to_owned()).or_insert_with(|| {
            emit(GroupEvent::Entered { group, policy });
            GroupState::new(policy.clone())
        });

        if let Some(group_passed) = state.decided {
            debug!("{name}: group already decided, skipping");
            return Directive::Skip { group_passed };
        }

        if let Some(passed) = state.evaluate() {
            state.decided = Some(passed);
            emit(GroupEvent::Decided {
                group,
                policy: &state.policy,
                verdict: state.verdict(passed),
            });
            return Directive::Skip {
                group_passed: passed,
            };
        }

        self.start(name);
        Directive::Run
    }

    /// Records the outcome of one phase of the invocation in flight.
    pub fn record_report(&mut self, name: &InvocationName, report: PhaseReport) {
        match &mut self.in_flight {
            Some(in_flight) if in_flight.name == *name => {
                if !report.passed {
                    debug!("{name}: {} failed", report.phase);
                }
                in_flight.passed &= report.passed;
            }
            _ => {
                warn!(
                    "{name}: ignoring {} report for an invocation that isn't running",
                    report.phase
                );
            }
        }
    }

    /// Called after a physical invocation that was run has finished.
    ///
    /// Returns whether the invocation passed.
    pub fn after_invocation(
        &mut self,
        name: &InvocationName,
        mut emit: impl FnMut(GroupEvent<'_>),
    ) -> bool {
        let passed = match self.in_flight.take() {
            Some(in_flight) if in_flight.name == *name => in_flight.passed,
            other => {
                warn!("{name}: finished without having started");
                self.in_flight = other;
                return false;
            }
        };

        let Some(state) = self.groups.get_mut(name.group()).filter(|_| name.is_stochastic())
        else {
            if !passed {
                self.native_failures += 1;
            }
            return passed;
        };

        state.results.push(passed);
        if let Some(group_passed) = state.evaluate() {
            state.decided = Some(group_passed);
            emit(GroupEvent::Decided {
                group: name.group(),
                policy: &state.policy,
                verdict: state.verdict(group_passed),
            });
        }
        passed
    }

    /// Returns the decision of every registered group, in group order.
    ///
    /// Groups that were never seen or never decided are `None`.
    pub fn decisions(&self) -> impl Iterator<Item = GroupDecision<'_>> + '_ {
        self.policies.keys().map(|group| GroupDecision {
            group,
            decided: self.groups.get(group).and_then(|state| state.decided),
        })
    }

    /// Returns the groups that have not been decided.
    pub fn pending_groups(&self) -> impl Iterator<Item = &str> + '_ {
        self.decisions()
            .filter(|decision| decision.decided.is_none())
            .map(|decision| decision.group)
    }

    /// Reconciles the raw result of the session with the group decisions.
    pub fn rectify(&self, raw_failed: bool, aborted: bool) -> Rectification {
        SessionRectifier {
            raw_failed,
            native_failed: self.native_failures > 0,
            aborted,
        }
        .rectify(self.decisions())
    }

    fn start(&mut self, name: &InvocationName) {
        if let Some(prev) = &self.in_flight {
            warn!("{name}: started while {} was still running", prev.name);
        }
        self.in_flight = Some(InFlight {
            name: name.clone(),
            passed: true,
        });
    }
}
