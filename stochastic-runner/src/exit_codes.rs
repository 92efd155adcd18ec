// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Documented exit codes.

/// Documented exit codes for stochastic test runs.
///
/// Unknown or unexpected failures always result in exit code 1.
pub enum StochasticExitCode {}

impl StochasticExitCode {
    /// No errors occurred and every test or stochastic group passed.
    pub const OK: i32 = 0;

    /// One or more tests or stochastic groups failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Creating a test list produced an error.
    pub const TEST_LIST_CREATION_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a run, for example an invalid
    /// config file.
    pub const SETUP_ERROR: i32 = 96;
}
