// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests from libtest binaries.
//!
//! Each binary is listed with `--list --format terse`, and each physical
//! invocation runs as its own process with `--exact <name> --nocapture`.

use crate::{
    controller::{Phase, PhaseReport},
    errors::{CreateTestListError, HostError},
    expander::{InvocationName, LogicalTest},
    runner::{InvocationOutput, TestHost},
};
use camino::Utf8PathBuf;
use duct::cmd;
use std::{collections::BTreeSet, time::Instant};
use tracing::debug;

/// Represents a test binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestBinary {
    /// The test binary.
    pub binary: Utf8PathBuf,

    /// A friendly name for this binary. If provided, this name will be used instead of the
    /// binary's file name.
    pub friendly_name: Option<String>,

    /// The working directory that this test should be executed in. If None, the current
    /// directory will not be changed.
    pub cwd: Option<Utf8PathBuf>,
}

impl TestBinary {
    /// Creates a new test binary with no friendly name or working directory.
    pub fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            friendly_name: None,
            cwd: None,
        }
    }

    /// Returns the name tests in this binary are scoped under.
    pub fn friendly_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .or_else(|| self.binary.file_stem())
            .unwrap_or(self.binary.as_str())
    }

    /// Runs this binary with `--list --format terse`, with and without `--ignored`, and returns
    /// the two outputs.
    pub fn exec_list(&self) -> Result<(String, String), CreateTestListError> {
        let non_ignored = self.exec_single(false)?;
        let ignored = self.exec_single(true)?;
        Ok((non_ignored, ignored))
    }

    fn exec_single(&self, ignored: bool) -> Result<String, CreateTestListError> {
        let mut argv = vec!["--list", "--format", "terse"];
        if ignored {
            argv.push("--ignored");
        }
        let command = format!("{} {}", self.binary, argv.join(" "));
        let mut expression = cmd(self.binary.as_std_path(), argv)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(cwd) = &self.cwd {
            expression = expression.dir(cwd.as_std_path());
        }

        let output = expression
            .run()
            .map_err(|error| CreateTestListError::CommandExecFail {
                command: command.clone(),
                error,
            })?;
        if !output.status.success() {
            return Err(CreateTestListError::CommandFail {
                command,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|_| CreateTestListError::CommandNonUtf8 { command })
    }
}

/// Parses the output of `--list --format terse` into test names.
///
/// Benchmarks are skipped.
pub fn parse_list_output(list_output: &str) -> Result<Vec<&str>, CreateTestListError> {
    // The output is in the form:
    // <test name>: test
    // <test name>: benchmark
    // ...
    let mut tests = Vec::new();
    for line in list_output.lines().filter(|line| !line.trim().is_empty()) {
        if let Some(name) = line.strip_suffix(": test") {
            tests.push(name);
        } else if line.ends_with(": benchmark") {
            debug!("skipping benchmark: {line}");
        } else {
            return Err(CreateTestListError::ParseLine {
                line: line.to_owned(),
                full_output: list_output.to_owned(),
            });
        }
    }
    Ok(tests)
}

/// A test within a binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryTest {
    binary: usize,
    name: String,
}

impl BinaryTest {
    /// Returns the test's name within its binary.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A host that runs tests from libtest binaries, one process per invocation.
#[derive(Clone, Debug)]
pub struct BinaryHost {
    binaries: Vec<TestBinary>,
    list_outputs: Option<Vec<(String, String)>>,
}

impl BinaryHost {
    /// Creates a host that lists and runs the given binaries.
    pub fn new(binaries: impl IntoIterator<Item = TestBinary>) -> Self {
        Self {
            binaries: binaries.into_iter().collect(),
            list_outputs: None,
        }
    }

    /// Creates a host with already-captured `--list` outputs, one per binary: the full list
    /// followed by the `--ignored` list.
    pub fn with_list_outputs(
        binaries_and_outputs: impl IntoIterator<
            Item = (TestBinary, impl Into<String>, impl Into<String>),
        >,
    ) -> Self {
        let mut binaries = Vec::new();
        let mut outputs = Vec::new();
        for (binary, non_ignored, ignored) in binaries_and_outputs {
            binaries.push(binary);
            outputs.push((non_ignored.into(), ignored.into()));
        }
        Self {
            binaries,
            list_outputs: Some(outputs),
        }
    }

    /// Returns the binaries in this host.
    pub fn binaries(&self) -> &[TestBinary] {
        &self.binaries
    }

    fn run_binary_test(
        binary: &TestBinary,
        name: &InvocationName,
        test_name: &str,
    ) -> Result<InvocationOutput, HostError> {
        let start_time = Instant::now();
        let argv = ["--exact", test_name, "--nocapture"];
        let command = || format!("{} {}", binary.binary, argv.join(" "));
        let mut expression = cmd(binary.binary.as_std_path(), argv)
            // Capture stdout and stderr.
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(cwd) = &binary.cwd {
            expression = expression.dir(cwd.as_std_path());
        }

        let output = expression.run().map_err(|error| HostError::Exec {
            name: name.to_string(),
            command: command(),
            error,
        })?;

        let report = if output.status.success() {
            PhaseReport::pass(Phase::Call)
        } else {
            PhaseReport::fail(Phase::Call)
        };
        Ok(InvocationOutput {
            reports: vec![report],
            stdout: output.stdout,
            stderr: output.stderr,
            time_taken: start_time.elapsed(),
        })
    }
}

impl TestHost for BinaryHost {
    type Item = BinaryTest;

    fn discover(&mut self) -> Result<Vec<LogicalTest<BinaryTest>>, HostError> {
        let mut tests = Vec::new();
        for (index, binary) in self.binaries.iter().enumerate() {
            let owned;
            let (non_ignored, ignored) = match &self.list_outputs {
                Some(outputs) => outputs
                    .get(index)
                    .map_or(("", ""), |(non_ignored, ignored)| {
                        (non_ignored.as_str(), ignored.as_str())
                    }),
                None => {
                    owned = binary.exec_list()?;
                    (owned.0.as_str(), owned.1.as_str())
                }
            };

            // `--list` includes ignored tests, and running one with `--exact` passes without
            // running its body.
            let ignored: BTreeSet<&str> = parse_list_output(ignored)?.into_iter().collect();
            let names = parse_list_output(non_ignored)?;
            debug!(
                "{}: found {} tests, {} ignored",
                binary.friendly_name(),
                names.len(),
                ignored.len(),
            );
            for name in names {
                if ignored.contains(name) {
                    debug!("{}: skipping ignored test {name}", binary.friendly_name());
                    continue;
                }
                tests.push(LogicalTest::new(
                    binary.friendly_name(),
                    name,
                    BinaryTest {
                        binary: index,
                        name: name.to_owned(),
                    },
                ));
            }
        }
        Ok(tests)
    }

    fn run(
        &mut self,
        name: &InvocationName,
        item: &BinaryTest,
    ) -> Result<InvocationOutput, HostError> {
        let binary = &self.binaries[item.binary];
        Self::run_binary_test(binary, name, &item.name)
    }
}
