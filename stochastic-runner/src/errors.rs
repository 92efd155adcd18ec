// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the stochastic runner.

use crate::config::{PlanId, PolicyId};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the stochastics config.
#[derive(Debug, Error)]
#[error("failed to parse stochastics config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of config parse error that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// One or more plan rules were invalid.
    #[error("invalid plan rules:\n{}", .0.iter().map(|err| format!("  - {err}")).join("\n"))]
    InvalidRules(Vec<PlanRuleError>),

    /// The plan fallback graph was invalid.
    #[error("invalid plan fallbacks:\n{}", .0.iter().map(|err| format!("  - {err}")).join("\n"))]
    FallbackErrors(Vec<FallbackError>),
}

/// An error in a single plan rule.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanRuleError {
    /// A rule referred to a policy that isn't defined.
    #[error("plan `{plan}` refers to unknown policy `{policy}`")]
    UnknownPolicy {
        /// The plan containing the rule.
        plan: PlanId,
        /// The unknown policy.
        policy: PolicyId,
    },

    /// A rule's test pattern was not a valid regular expression.
    #[error("plan `{plan}` has an invalid test pattern `{pattern}`: {message}")]
    InvalidPattern {
        /// The plan containing the rule.
        plan: PlanId,
        /// The pattern as written.
        pattern: String,
        /// The message produced by the regex parser.
        message: String,
    },
}

/// An error in the plan fallback graph.
#[derive(Clone, Debug, Error, PartialEq, Eq, Hash)]
pub enum FallbackError {
    /// The root plan declared a fallback.
    #[error("the `{0}` plan cannot override another plan")]
    RootPlanFallback(String),

    /// A plan declared more than one fallback.
    #[error("plan `{0}` overrides both `{1}` and `{2}`; a plan can override at most one plan")]
    DuplicateFallback(String, String, String),

    /// A plan declared itself as its own fallback.
    #[error("plan `{0}` cannot override itself")]
    SelfReferentialFallback(String),

    /// A plan overrides a plan that isn't defined.
    #[error("plan `{0}` overrides unknown plan `{1}`")]
    UnknownFallback(String, String),

    /// The fallback graph contains one or more cycles.
    #[error(
        "plan fallback cycle detected: {}",
        .0.iter().map(|scc| format!("[{}]", scc.join(", "))).join(", ")
    )]
    FallbackCycle(Vec<Vec<String>>),
}

/// An error that occurred while creating a list of tests from a test binary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CreateTestListError {
    /// Running the binary with `--list` failed to start.
    #[error("failed to execute `{command}`")]
    CommandExecFail {
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Running the binary with `--list` exited with a failure.
    #[error(
        "`{command}` exited unsuccessfully\n--- stdout:\n{}\n--- stderr:\n{}\n---",
        String::from_utf8_lossy(.stdout),
        String::from_utf8_lossy(.stderr)
    )]
    CommandFail {
        /// The command line.
        command: String,
        /// Captured standard output.
        stdout: Vec<u8>,
        /// Captured standard error.
        stderr: Vec<u8>,
    },

    /// The `--list` output was not valid UTF-8.
    #[error("`{command}` produced non-UTF-8 output")]
    CommandNonUtf8 {
        /// The command line.
        command: String,
    },

    /// A line in the `--list` output could not be parsed.
    #[error("line `{line}` did not end with the string `: test` or `: benchmark`, full output:\n{full_output}")]
    ParseLine {
        /// The offending line.
        line: String,
        /// The full output.
        full_output: String,
    },
}

/// A fatal error raised by the host while running an invocation.
///
/// Test failures are not host errors: they are reported as data. A host error
/// means the session cannot continue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// A test process could not be spawned or waited on.
    #[error("failed to execute test `{name}` via `{command}`")]
    Exec {
        /// The physical invocation name.
        name: String,
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Discovering tests failed.
    #[error("failed to discover tests")]
    Discover(#[from] CreateTestListError),

    /// Two discovered tests share an identifier.
    #[error("test `{id}` was discovered more than once")]
    DuplicateTest {
        /// The identifier of the test.
        id: String,
    },
}

/// An error that occurred while writing a reporter event.
#[derive(Debug, Error)]
#[error("error writing event to output")]
pub struct WriteEventError(#[from] pub io::Error);

/// An error that occurred while driving a session.
#[derive(Debug, Error)]
pub enum SessionError<E> {
    /// The host failed to discover tests.
    #[error("test discovery failed")]
    Discover(#[source] HostError),

    /// The event callback returned an error.
    #[error("event callback failed")]
    Callback(#[source] E),
}

/// Displays an error along with its chain of causes, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, "\n  caused by:\n  - {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
