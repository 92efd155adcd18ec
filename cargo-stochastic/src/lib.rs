// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run test binaries under stochastic pass/fail policies.
//!
//! Tests covered by a policy are run several times, and pass if enough of
//! those runs pass. Policies are assigned to tests by the plans in
//! `.config/stochastics.toml`.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputContext;
