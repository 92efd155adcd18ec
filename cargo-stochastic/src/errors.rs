// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use stochastic_runner::{
    errors::{ConfigParseError, HostError, SessionError, WriteEventError},
    exit_codes::StochasticExitCode,
};
use thiserror::Error;
use tracing::{error, info};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that was anticipated and has a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("current directory is invalid")]
    CurrentDirInvalid {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirNonUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("no config file found")]
    ConfigNotFound { config_file: Utf8PathBuf },
    #[error("test list creation failed")]
    TestListCreationFailed {
        #[from]
        err: HostError,
    },
    #[error("error writing output")]
    WriteEventError {
        #[from]
        err: WriteEventError,
    },
    #[error("test run failed")]
    TestRunFailed,
}

impl From<SessionError<WriteEventError>> for ExpectedError {
    fn from(error: SessionError<WriteEventError>) -> Self {
        match error {
            SessionError::Discover(err) => Self::TestListCreationFailed { err },
            SessionError::Callback(err) => Self::WriteEventError { err },
        }
    }
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::CurrentDirNonUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ConfigNotFound { .. } => StochasticExitCode::SETUP_ERROR,
            Self::TestListCreationFailed { .. } => StochasticExitCode::TEST_LIST_CREATION_FAILED,
            Self::WriteEventError { .. } => StochasticExitCode::WRITE_OUTPUT_ERROR,
            Self::TestRunFailed => StochasticExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirInvalid { err } => {
                error!("could not read the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirNonUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse stochastics config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ConfigNotFound { config_file } => {
                error!(
                    "no stochastics config found at `{}`",
                    config_file.style(styles.bold)
                );
                info!(
                    target: NO_HEADING,
                    "{}",
                    "(hint: pass --config-file to use a different file)".style(styles.warning_text)
                );
                None
            }
            Self::TestListCreationFailed { err } => {
                error!("failed to create test list");
                Some(err as &dyn Error)
            }
            Self::WriteEventError { err } => {
                error!("failed to write event to output");
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
