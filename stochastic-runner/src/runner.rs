// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driving a session of tests through a host.
//!
//! A [`TestHost`] knows how to discover and run tests. The [`SessionRunner`]
//! asks the host for its tests, expands them, and then runs every physical
//! invocation in order, consulting the execution controller before and after
//! each one. Progress is reported through [`SessionEvent`]s.

use crate::{
    config::{PlanId, Policy, PolicyResolver},
    controller::{Directive, ExecutionController, GroupEvent, GroupVerdict, PhaseReport},
    errors::{HostError, SessionError},
    exit_codes::StochasticExitCode,
    expander::{Invocation, InvocationExpander, InvocationName, LogicalTest},
    rectifier::Rectification,
};
use std::{
    collections::HashSet,
    convert::Infallible,
    fmt,
    time::{Duration, Instant},
};
use tracing::{debug, error};

/// A test framework that can discover and run tests.
pub trait TestHost {
    /// The host's handle for running one variant of a test.
    type Item: Clone;

    /// Discovers the logical tests to run, in the order they should run.
    fn discover(&mut self) -> Result<Vec<LogicalTest<Self::Item>>, HostError>;

    /// Runs one physical invocation through its phases.
    ///
    /// A failing test is not an error: it is reported through the phase
    /// reports. An error means the session cannot continue.
    fn run(
        &mut self,
        name: &InvocationName,
        item: &Self::Item,
    ) -> Result<InvocationOutput, HostError>;
}

/// The result of running one physical invocation.
#[derive(Clone, Debug, Default)]
pub struct InvocationOutput {
    /// The outcome of each phase that ran, in order.
    pub reports: Vec<PhaseReport>,

    /// Captured standard output.
    pub stdout: Vec<u8>,

    /// Captured standard error.
    pub stderr: Vec<u8>,

    /// The time the invocation took.
    pub time_taken: Duration,
}

impl InvocationOutput {
    /// Returns true if every phase passed.
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(|report| report.passed)
    }

    /// Returns the status of the invocation.
    pub fn status(&self) -> InvocationStatus {
        if self.is_success() {
            InvocationStatus::Pass
        } else {
            InvocationStatus::Fail
        }
    }
}

/// The status of a physical invocation that ran.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvocationStatus {
    /// Every phase passed.
    Pass,
    /// At least one phase failed.
    Fail,
}

impl InvocationStatus {
    /// Returns true if the invocation passed.
    pub fn is_success(self) -> bool {
        match self {
            InvocationStatus::Pass => true,
            InvocationStatus::Fail => false,
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationStatus::Pass => f.pad("PASS"),
            InvocationStatus::Fail => f.pad("FAIL"),
        }
    }
}

/// An event produced while running a session.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// Tests were discovered and expanded.
    SessionStarted {
        /// The active plan, or `None` if the engine is inert.
        plan: Option<&'a PlanId>,

        /// The number of logical tests covered by a policy.
        covered: usize,

        /// The number of physical invocations scheduled.
        invocation_count: usize,
    },

    /// The first invocation of a stochastic group is about to run.
    GroupEntered {
        /// The group key.
        group: &'a str,

        /// The group's policy.
        policy: &'a Policy,
    },

    /// A physical invocation finished running.
    InvocationFinished {
        /// The name of the invocation.
        name: &'a InvocationName,

        /// The status of the invocation.
        status: InvocationStatus,

        /// The captured output.
        output: &'a InvocationOutput,
    },

    /// A physical invocation was skipped because its group is decided.
    InvocationSkipped {
        /// The name of the invocation.
        name: &'a InvocationName,

        /// The decision of the group.
        group_passed: bool,
    },

    /// A stochastic group was decided.
    GroupDecided {
        /// The group key.
        group: &'a str,

        /// The group's policy.
        policy: &'a Policy,

        /// The final tally.
        verdict: GroupVerdict,
    },

    /// The host raised a fatal error. No further invocations run.
    SessionAborted {
        /// The invocation that was running.
        name: &'a InvocationName,

        /// The error.
        error: &'a HostError,
    },

    /// The session finished.
    SessionFinished {
        /// The time the session took.
        elapsed: Duration,

        /// Statistics for the session.
        run_stats: RunStats,

        /// The outcome of rectification.
        rectification: Rectification,

        /// The groups that were never decided.
        pending: &'a [&'a str],
    },
}

/// Statistics for a session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of invocations scheduled at the beginning.
    ///
    /// If the session is aborted, this will be more than `final_run_count`.
    pub initial_run_count: usize,

    /// The number of invocations that were run or skipped.
    pub final_run_count: usize,

    /// The number of invocations that passed.
    pub passed: usize,

    /// The number of invocations that failed.
    pub failed: usize,

    /// The number of invocations skipped because their group was decided.
    pub skipped: usize,

    /// The number of failed invocations that were not part of a stochastic group.
    pub native_failed: usize,

    /// The number of stochastic groups that passed.
    pub groups_passed: usize,

    /// The number of stochastic groups that failed or were never decided.
    pub groups_failed: usize,
}

impl RunStats {
    /// Returns true if this session is a success at the level of individual invocations.
    ///
    /// This is the raw result, before stochastic groups are taken into account.
    /// A session is a failure if any of the following are true:
    /// * the session was aborted: the initial run count is greater than the final run count
    /// * any invocation failed
    pub fn is_success(&self) -> bool {
        if self.initial_run_count > self.final_run_count {
            return false;
        }
        self.failed == 0
    }
}

/// The result of a session.
#[derive(Debug)]
pub struct SessionSummary {
    /// Statistics for the session.
    pub run_stats: RunStats,

    /// The outcome of rectification.
    pub rectification: Rectification,

    /// The fatal host error that aborted the session, if any.
    pub abort: Option<HostError>,
}

impl SessionSummary {
    /// Returns true if the session passed after rectification.
    pub fn is_success(&self) -> bool {
        self.rectification.is_success()
    }

    /// Returns the process exit code for this session.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            StochasticExitCode::OK
        } else {
            StochasticExitCode::TEST_RUN_FAILED
        }
    }
}

/// Runs a session of tests under the stochastic engine.
#[derive(Debug)]
pub struct SessionRunner<'cfg> {
    expander: InvocationExpander<'cfg>,
}

impl<'cfg> SessionRunner<'cfg> {
    /// Creates a runner that resolves policies through `resolver`.
    pub fn new(resolver: PolicyResolver<'cfg>) -> Self {
        Self {
            expander: InvocationExpander::new(resolver),
        }
    }

    /// Creates a runner that runs every test natively.
    pub fn inert() -> Self {
        Self {
            expander: InvocationExpander::inert(),
        }
    }

    /// Returns the active plan, or `None` if the runner is inert.
    pub fn plan(&self) -> Option<&PlanId> {
        self.expander.resolver().map(|resolver| resolver.plan())
    }

    /// Returns the number of logical tests covered by a policy so far.
    pub fn covered_count(&self) -> usize {
        self.expander.covered_count()
    }

    /// Discovers tests through `host` and returns the physical invocations that would run.
    pub fn schedule<H: TestHost>(
        &mut self,
        host: &mut H,
    ) -> Result<Vec<Invocation<H::Item>>, HostError> {
        let tests = host.discover()?;
        let mut seen = HashSet::new();
        for variant in tests.iter().flat_map(|test| &test.variants) {
            if !seen.insert(variant.id.as_str()) {
                return Err(HostError::DuplicateTest {
                    id: variant.id.clone(),
                });
            }
        }

        let mut invocations = Vec::with_capacity(tests.len());
        for test in tests {
            let result = self.expander.expand(&test);
            invocations.extend(result.into_invocations(test));
        }
        debug!(
            "scheduled {} invocations, {} tests covered",
            invocations.len(),
            self.expander.covered_count()
        );
        Ok(invocations)
    }

    /// Runs every test discovered by `host`.
    ///
    /// The callback is called with each event.
    pub fn execute<H, F>(self, host: &mut H, mut callback: F) -> Result<SessionSummary, HostError>
    where
        H: TestHost,
        F: FnMut(SessionEvent<'_>),
    {
        match self.try_execute::<H, Infallible, _>(host, |event| {
            callback(event);
            Ok(())
        }) {
            Ok(summary) => Ok(summary),
            Err(SessionError::Discover(error)) => Err(error),
            Err(SessionError::Callback(never)) => match never {},
        }
    }

    /// Runs every test discovered by `host`.
    ///
    /// Accepts a callback that is called with each event. If the callback returns an error, the
    /// session stops and the error is returned.
    pub fn try_execute<H, E, F>(
        mut self,
        host: &mut H,
        mut callback: F,
    ) -> Result<SessionSummary, SessionError<E>>
    where
        H: TestHost,
        F: FnMut(SessionEvent<'_>) -> Result<(), E>,
    {
        let start_time = Instant::now();
        let invocations = self.schedule(host).map_err(SessionError::Discover)?;
        let plan = self.plan().cloned();
        let covered = self.expander.covered_count();
        let mut controller = self.expander.into_controller();

        callback(SessionEvent::SessionStarted {
            plan: plan.as_ref(),
            covered,
            invocation_count: invocations.len(),
        })
        .map_err(SessionError::Callback)?;

        let mut run_stats = RunStats {
            initial_run_count: invocations.len(),
            ..RunStats::default()
        };
        let mut abort = None;

        for invocation in &invocations {
            let name = &invocation.name;
            let mut callback_error = None;

            let directive = controller.before_invocation(name, |event| {
                forward_group_event(&mut callback, &mut callback_error, event)
            });
            if let Some(error) = callback_error.take() {
                return Err(SessionError::Callback(error));
            }

            if let Directive::Skip { group_passed } = directive {
                run_stats.final_run_count += 1;
                run_stats.skipped += 1;
                callback(SessionEvent::InvocationSkipped { name, group_passed })
                    .map_err(SessionError::Callback)?;
                continue;
            }

            let output = match host.run(name, &invocation.item) {
                Ok(output) => output,
                Err(err) => {
                    error!("aborting session: {name} could not be run");
                    callback(SessionEvent::SessionAborted { name, error: &err })
                        .map_err(SessionError::Callback)?;
                    abort = Some(err);
                    break;
                }
            };

            let status = output.status();
            run_stats.final_run_count += 1;
            match status {
                InvocationStatus::Pass => run_stats.passed += 1,
                InvocationStatus::Fail => run_stats.failed += 1,
            }
            callback(SessionEvent::InvocationFinished {
                name,
                status,
                output: &output,
            })
            .map_err(SessionError::Callback)?;

            for report in &output.reports {
                controller.record_report(name, *report);
            }
            controller.after_invocation(name, |event| {
                forward_group_event(&mut callback, &mut callback_error, event)
            });
            if let Some(error) = callback_error {
                return Err(SessionError::Callback(error));
            }
        }

        Self::finish_stats(&controller, &mut run_stats);
        let rectification = controller.rectify(!run_stats.is_success(), abort.is_some());
        let pending: Vec<&str> = controller.pending_groups().collect();

        callback(SessionEvent::SessionFinished {
            elapsed: start_time.elapsed(),
            run_stats,
            rectification,
            pending: &pending,
        })
        .map_err(SessionError::Callback)?;

        Ok(SessionSummary {
            run_stats,
            rectification,
            abort,
        })
    }

    fn finish_stats(controller: &ExecutionController, run_stats: &mut RunStats) {
        run_stats.native_failed = controller.native_failures();
        for decision in controller.decisions() {
            if decision.decided == Some(true) {
                run_stats.groups_passed += 1;
            } else {
                run_stats.groups_failed += 1;
            }
        }
    }
}

fn forward_group_event<F, E>(callback: &mut F, error: &mut Option<E>, event: GroupEvent<'_>)
where
    F: FnMut(SessionEvent<'_>) -> Result<(), E>,
{
    if error.is_some() {
        return;
    }
    let event = match event {
        GroupEvent::Entered { group, policy } => SessionEvent::GroupEntered { group, policy },
        GroupEvent::Decided {
            group,
            policy,
            verdict,
        } => SessionEvent::GroupDecided {
            group,
            policy,
            verdict,
        },
    };
    if let Err(err) = callback(event) {
        *error = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Plan, StochasticConfig},
        controller::Phase,
        errors::CreateTestListError,
    };
    use pretty_assertions::assert_eq;
    use std::{collections::HashMap, io};

    /// A host whose tests follow a script of outcomes, one per run.
    #[derive(Default)]
    struct ScriptedHost {
        tests: Vec<(&'static str, Vec<bool>)>,
        runs: HashMap<String, usize>,
        ran: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl TestHost for ScriptedHost {
        type Item = &'static str;

        fn discover(&mut self) -> Result<Vec<LogicalTest<Self::Item>>, HostError> {
            Ok(self
                .tests
                .iter()
                .map(|(name, _)| LogicalTest::new("suite", *name, *name))
                .collect())
        }

        fn run(
            &mut self,
            name: &InvocationName,
            item: &Self::Item,
        ) -> Result<InvocationOutput, HostError> {
            if self.fail_on == Some(*item) {
                return Err(HostError::Exec {
                    name: name.to_string(),
                    command: "scripted".to_owned(),
                    error: io::Error::other("boom"),
                });
            }
            self.ran.push(name.to_string());
            let count = self.runs.entry(item.to_string()).or_default();
            let outcomes = &self
                .tests
                .iter()
                .find(|(test, _)| test == item)
                .expect("test exists")
                .1;
            let passed = outcomes[*count % outcomes.len()];
            *count += 1;
            Ok(InvocationOutput {
                reports: vec![
                    PhaseReport::pass(Phase::Setup),
                    PhaseReport {
                        phase: Phase::Call,
                        passed,
                    },
                    PhaseReport::pass(Phase::Teardown),
                ],
                ..InvocationOutput::default()
            })
        }
    }

    fn config(policy: Policy) -> StochasticConfig {
        let id = policy.id.clone();
        StochasticConfig::from_parts([Plan::new("default", [(id, "flaky")])], [policy], [])
            .expect("config is valid")
    }

    fn run(config: &StochasticConfig, host: &mut ScriptedHost) -> (SessionSummary, Vec<String>) {
        let mut events = Vec::new();
        let summary = SessionRunner::new(config.resolver("default"))
            .execute(host, |event| {
                let line = match event {
                    SessionEvent::SessionStarted { covered, .. } => format!("start {covered}"),
                    SessionEvent::GroupEntered { group, .. } => format!("enter {group}"),
                    SessionEvent::InvocationFinished { name, status, .. } => {
                        format!("{status} {name}")
                    }
                    SessionEvent::InvocationSkipped { name, .. } => format!("SKIP {name}"),
                    SessionEvent::GroupDecided { verdict, .. } => {
                        format!("decided {}", verdict.passed)
                    }
                    SessionEvent::SessionAborted { name, .. } => format!("abort {name}"),
                    SessionEvent::SessionFinished { .. } => "finish".to_owned(),
                };
                events.push(line);
            })
            .expect("discovery succeeds");
        (summary, events)
    }

    #[test]
    fn early_pass_skips_remaining_repeats() {
        let config = config(Policy::new("p", 2, 3).with_pass_fast(true).with_fail_fast(true));
        let mut host = ScriptedHost {
            tests: vec![("flaky", vec![true])],
            ..ScriptedHost::default()
        };
        let (summary, events) = run(&config, &mut host);
        assert_eq!(
            events,
            [
                "start 1",
                "enter suite::flaky",
                "PASS suite::flaky[::p#01_of_03]",
                "PASS suite::flaky[::p#02_of_03]",
                "decided true",
                "SKIP suite::flaky[::p#03_of_03]",
                "finish",
            ]
        );
        assert_eq!(host.ran.len(), 2);
        assert_eq!(summary.run_stats.skipped, 1);
        assert_eq!(summary.rectification, Rectification::Unchanged { failed: false });
        assert_eq!(summary.exit_code(), StochasticExitCode::OK);
    }

    #[test]
    fn absorbed_failures_are_overridden() {
        let config = config(Policy::new("p", 2, 3));
        let mut host = ScriptedHost {
            tests: vec![("flaky", vec![false, true, true]), ("stable", vec![true])],
            ..ScriptedHost::default()
        };
        let (summary, _) = run(&config, &mut host);
        assert!(!summary.run_stats.is_success(), "raw result is a failure");
        assert_eq!(summary.run_stats.failed, 1);
        assert_eq!(summary.run_stats.groups_passed, 1);
        assert_eq!(summary.rectification, Rectification::Overridden);
        assert_eq!(summary.exit_code(), StochasticExitCode::OK);
    }

    #[test]
    fn native_failure_is_not_overridden() {
        let config = config(Policy::new("p", 2, 3));
        let mut host = ScriptedHost {
            tests: vec![("flaky", vec![false, true, true]), ("broken", vec![false])],
            ..ScriptedHost::default()
        };
        let (summary, _) = run(&config, &mut host);
        assert_eq!(summary.run_stats.native_failed, 1);
        assert_eq!(summary.rectification, Rectification::Unchanged { failed: true });
        assert_eq!(summary.exit_code(), StochasticExitCode::TEST_RUN_FAILED);
    }

    #[test]
    fn host_error_aborts_the_session() {
        let config = config(Policy::new("p", 2, 3));
        let mut host = ScriptedHost {
            tests: vec![("flaky", vec![true]), ("later", vec![true])],
            fail_on: Some("later"),
            ..ScriptedHost::default()
        };
        let (summary, events) = run(&config, &mut host);
        assert!(events.contains(&"abort suite::later".to_owned()));
        assert!(summary.abort.is_some());
        assert!(!summary.is_success());

        let mut host = ScriptedHost {
            tests: vec![("flaky", vec![true]), ("later", vec![true])],
            fail_on: Some("flaky"),
            ..ScriptedHost::default()
        };
        let (summary, events) = run(&config, &mut host);
        assert_eq!(
            events,
            [
                "start 1",
                "enter suite::flaky",
                "abort suite::flaky[::p#01_of_03]",
                "finish"
            ]
        );
        assert_eq!(summary.run_stats.groups_failed, 1, "pending group counts as failed");
        assert_eq!(summary.run_stats.final_run_count, 0);
    }

    #[test]
    fn callback_errors_stop_the_session() {
        let config = config(Policy::new("p", 2, 3));
        let mut host = ScriptedHost {
            tests: vec![("flaky", vec![true])],
            ..ScriptedHost::default()
        };
        let result = SessionRunner::new(config.resolver("default")).try_execute(
            &mut host,
            |event| match event {
                SessionEvent::GroupEntered { .. } => Err("stop"),
                _ => Ok(()),
            },
        );
        assert!(matches!(result, Err(SessionError::Callback("stop"))));
        assert!(host.ran.is_empty());
    }

    #[test]
    fn discovery_errors_are_returned() {
        struct BrokenHost;
        impl TestHost for BrokenHost {
            type Item = ();
            fn discover(&mut self) -> Result<Vec<LogicalTest<()>>, HostError> {
                Err(CreateTestListError::CommandNonUtf8 {
                    command: "broken --list".to_owned(),
                }
                .into())
            }
            fn run(&mut self, _: &InvocationName, _: &()) -> Result<InvocationOutput, HostError> {
                unreachable!("nothing to run")
            }
        }

        let result = SessionRunner::inert().execute(&mut BrokenHost, |_| {});
        assert!(matches!(result, Err(HostError::Discover(_))));
    }

    #[test]
    fn run_stats_is_success() {
        assert!(RunStats::default().is_success(), "empty run => success");
        assert!(
            !RunStats {
                initial_run_count: 42,
                final_run_count: 41,
                ..RunStats::default()
            }
            .is_success(),
            "initial run count > final run count => failure"
        );
        assert!(
            !RunStats {
                initial_run_count: 42,
                final_run_count: 42,
                failed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "failed => failure"
        );
        assert!(
            RunStats {
                initial_run_count: 42,
                final_run_count: 42,
                skipped: 1,
                ..RunStats::default()
            }
            .is_success(),
            "skipped => not considered a failure"
        );
    }
}
