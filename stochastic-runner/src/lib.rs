// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for running stochastic tests.
//!
//! A stochastic test is run `out_of` times and passes if at least `at_least`
//! of those runs pass. The flow through this crate is:
//!
//! 1. [`config`] loads policies and plans and resolves a test to its policy.
//! 2. [`expander`] turns each discovered test into its physical invocations.
//! 3. [`controller`] decides, per invocation, whether to run it, and tracks
//!    per-group verdicts.
//! 4. [`rectifier`] reconciles the raw session result with those verdicts.
//!
//! [`runner`] drives these steps against a [`runner::TestHost`]: either test
//! binaries ([`list`]) or in-process test cases ([`harness`]).

pub mod config;
pub mod controller;
pub mod errors;
pub mod exit_codes;
pub mod expander;
pub mod git;
pub mod harness;
mod helpers;
pub mod list;
pub mod rectifier;
pub mod reporter;
pub mod runner;
