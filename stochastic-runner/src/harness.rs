// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An in-process test harness with stochastic policies.
//!
//! Use it from a test target with `harness = false`:
//!
//! ```toml
//! [[test]]
//! name = "network"
//! harness = false
//! ```
//!
//! ```no_run
//! use stochastic_runner::harness::{Harness, TestCase};
//!
//! fn connects() -> stochastic_runner::harness::Result<()> {
//!     // ... write test here
//!     Ok(())
//! }
//!
//! fn main() {
//!     let code = Harness::new("network")
//!         .test(TestCase::new("connects", connects))
//!         .run();
//!     std::process::exit(code);
//! }
//! ```
//!
//! Tests are identified as `<scope>::<name>`, so a rule pattern like
//! `^network::` covers every test above.

use crate::{
    config::{DefaultConfigWarnings, PlanId, StochasticConfig},
    controller::{Phase, PhaseReport},
    errors::{DisplayErrorChain, HostError, SessionError, WriteEventError},
    exit_codes::StochasticExitCode,
    expander::{InvocationName, LogicalTest},
    git,
    reporter::StochasticReporter,
    runner::{InvocationOutput, SessionRunner, SessionSummary, TestHost},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    any::Any,
    io::{self, Write},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    time::Instant,
};
use tracing::{debug, error};

/// The result type for harness tests.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

type Body = Rc<dyn Fn() -> Result<()>>;

/// A test run by the [`Harness`].
#[derive(Clone)]
pub struct TestCase {
    name: String,
    setup: Option<Body>,
    teardown: Option<Body>,
    cases: Vec<(Option<String>, Body)>,
}

impl TestCase {
    /// Creates a test with a single body.
    pub fn new(name: impl Into<String>, body: impl Fn() -> Result<()> + 'static) -> Self {
        Self {
            name: name.into(),
            setup: None,
            teardown: None,
            cases: vec![(None, Rc::new(body))],
        }
    }

    /// Creates a test that runs `body` once per parameter case.
    ///
    /// Each case becomes a variant identified as `<scope>::<name>[<case>]`.
    pub fn with_cases<P: 'static>(
        name: impl Into<String>,
        cases: impl IntoIterator<Item = (impl Into<String>, P)>,
        body: impl Fn(&P) -> Result<()> + 'static,
    ) -> Self {
        let body = Rc::new(body);
        let cases = cases
            .into_iter()
            .map(|(case, param)| {
                let body = body.clone();
                let run: Body = Rc::new(move || body(&param));
                (Some(case.into()), run)
            })
            .collect();
        Self {
            name: name.into(),
            setup: None,
            teardown: None,
            cases,
        }
    }

    /// Runs `setup` before each invocation. If it fails, the body is not run.
    pub fn with_setup(mut self, setup: impl Fn() -> Result<()> + 'static) -> Self {
        self.setup = Some(Rc::new(setup));
        self
    }

    /// Runs `teardown` after each invocation, even if the body failed.
    pub fn with_teardown(mut self, teardown: impl Fn() -> Result<()> + 'static) -> Self {
        self.teardown = Some(Rc::new(teardown));
        self
    }

    /// Returns the name of the test.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .field(
                "cases",
                &self.cases.iter().map(|(case, _)| case).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Identifies one variant of one test in the harness.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaseRef {
    test: usize,
    case: usize,
}

/// Runs [`TestCase`]s in process.
#[derive(Debug)]
pub struct Harness {
    scope: String,
    tests: Vec<TestCase>,
    plan: Option<String>,
    config_file: Option<Utf8PathBuf>,
    workspace_root: Option<Utf8PathBuf>,
    color: bool,
}

impl Harness {
    /// Creates a harness whose tests are scoped under `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tests: Vec::new(),
            plan: None,
            config_file: None,
            workspace_root: None,
            color: false,
        }
    }

    /// Adds a test.
    pub fn test(mut self, test: TestCase) -> Self {
        self.tests.push(test);
        self
    }

    /// Uses `plan` instead of the plan from the environment or git branch.
    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    /// Reads the config from `config_file` instead of the default location.
    pub fn config_file(mut self, config_file: impl Into<Utf8PathBuf>) -> Self {
        self.config_file = Some(config_file.into());
        self
    }

    /// Sets the directory the default config file and git branch are looked up from.
    ///
    /// Defaults to `CARGO_MANIFEST_DIR`, or the current directory if that isn't set.
    pub fn workspace_root(mut self, workspace_root: impl Into<Utf8PathBuf>) -> Self {
        self.workspace_root = Some(workspace_root.into());
        self
    }

    /// Colorizes the output.
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Runs every test, reporting to standard output, and returns the process exit code.
    ///
    /// A config that fails to load is logged and the tests run natively.
    pub fn run(self) -> i32 {
        let workspace_root = self.resolve_workspace_root();
        let config = match self.load_config(&workspace_root) {
            Ok(config) => config,
            Err(error) => {
                error!(
                    "stochastic policies disabled for this run: {}",
                    DisplayErrorChain::new(&*error)
                );
                None
            }
        };
        let plan = git::select_plan(self.plan.as_deref(), &workspace_root);

        let mut reporter = StochasticReporter::new();
        if self.color {
            reporter.colorize();
        }

        // Panic messages are captured into each invocation's output.
        let hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let result = self.run_with(config.as_ref(), plan, &reporter, &mut io::stdout().lock());
        panic::set_hook(hook);

        match result {
            Ok(summary) => summary.exit_code(),
            Err(error) => {
                error!("{}", DisplayErrorChain::new(&error));
                match error {
                    SessionError::Discover(_) => StochasticExitCode::TEST_LIST_CREATION_FAILED,
                    SessionError::Callback(_) => StochasticExitCode::WRITE_OUTPUT_ERROR,
                }
            }
        }
    }

    /// Runs every test against `config` under `plan`, reporting to `writer`.
    ///
    /// With no config, every test runs natively.
    pub fn run_with(
        self,
        config: Option<&StochasticConfig>,
        plan: PlanId,
        reporter: &StochasticReporter,
        writer: &mut dyn Write,
    ) -> std::result::Result<SessionSummary, SessionError<WriteEventError>> {
        let runner = match config {
            Some(config) => SessionRunner::new(config.resolver(plan)),
            None => SessionRunner::inert(),
        };
        let mut host = HarnessHost {
            scope: self.scope,
            tests: self.tests,
        };
        runner.try_execute(&mut host, |event| reporter.report_event(event, writer))
    }

    fn resolve_workspace_root(&self) -> Utf8PathBuf {
        if let Some(root) = &self.workspace_root {
            return root.clone();
        }
        if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
            return dir.into();
        }
        std::env::current_dir()
            .ok()
            .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."))
    }

    fn load_config(
        &self,
        workspace_root: &Utf8Path,
    ) -> std::result::Result<Option<StochasticConfig>, Box<dyn std::error::Error>> {
        match &self.config_file {
            Some(config_file) => {
                let config = StochasticConfig::from_file(config_file, &mut DefaultConfigWarnings)?;
                Ok(Some(config))
            }
            None => {
                let config =
                    StochasticConfig::from_workspace_root(workspace_root, &mut DefaultConfigWarnings)?;
                if config.is_none() {
                    debug!(
                        "no config at {}, running tests natively",
                        workspace_root.join(StochasticConfig::CONFIG_PATH)
                    );
                }
                Ok(config)
            }
        }
    }
}

struct HarnessHost {
    scope: String,
    tests: Vec<TestCase>,
}

impl HarnessHost {
    fn run_phase(phase: Phase, body: &Body, stderr: &mut Vec<u8>) -> PhaseReport {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body()));
        let message = match outcome {
            Ok(Ok(())) => return PhaseReport::pass(phase),
            Ok(Err(error)) => format!("{phase} failed: {error}"),
            Err(payload) => format!("{phase} panicked: {}", panic_payload_to_string(payload)),
        };
        stderr.extend_from_slice(message.as_bytes());
        stderr.push(b'\n');
        PhaseReport::fail(phase)
    }
}

impl TestHost for HarnessHost {
    type Item = CaseRef;

    fn discover(&mut self) -> std::result::Result<Vec<LogicalTest<CaseRef>>, HostError> {
        let tests = self
            .tests
            .iter()
            .enumerate()
            .map(|(test_index, test)| {
                let refs = (0..test.cases.len()).map(|case| CaseRef {
                    test: test_index,
                    case,
                });
                match test.cases.as_slice() {
                    [(None, _)] => LogicalTest::new(
                        &self.scope,
                        &test.name,
                        CaseRef {
                            test: test_index,
                            case: 0,
                        },
                    ),
                    cases => LogicalTest::with_cases(
                        &self.scope,
                        &test.name,
                        cases
                            .iter()
                            .zip(refs)
                            .map(|((case, _), item)| (case.clone().unwrap_or_default(), item)),
                    ),
                }
            })
            .collect();
        Ok(tests)
    }

    fn run(
        &mut self,
        name: &InvocationName,
        item: &CaseRef,
    ) -> std::result::Result<InvocationOutput, HostError> {
        let start_time = Instant::now();
        let test = &self.tests[item.test];
        let (_, body) = &test.cases[item.case];
        debug!("{name}: running in process");

        let mut output = InvocationOutput::default();
        let setup_passed = match &test.setup {
            Some(setup) => {
                let report = Self::run_phase(Phase::Setup, setup, &mut output.stderr);
                output.reports.push(report);
                report.passed
            }
            None => true,
        };
        if setup_passed {
            let report = Self::run_phase(Phase::Call, body, &mut output.stderr);
            output.reports.push(report);
        }
        if let Some(teardown) = &test.teardown {
            let report = Self::run_phase(Phase::Teardown, teardown, &mut output.stderr);
            output.reports.push(report);
        }
        output.time_taken = start_time.elapsed();
        Ok(output)
    }
}

/// Extracts a string message from a panic payload.
fn panic_payload_to_string(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(unknown panic payload)".to_owned()
    }
}
