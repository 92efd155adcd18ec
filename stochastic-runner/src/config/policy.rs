// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::{borrow::Borrow, fmt};

/// The name of a policy, unique within a configuration.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    /// Creates a new policy identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PolicyId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PolicyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PolicyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A pass/fail threshold: at least `at_least` of `out_of` runs must pass.
///
/// `at_least <= out_of` is expected but not enforced. A policy with
/// `at_least > out_of` can never pass.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Policy {
    /// The name of this policy.
    pub id: PolicyId,

    /// The minimum number of passing runs.
    pub at_least: u32,

    /// The number of runs. Zero disables the test.
    pub out_of: u32,

    /// Stop running repeats once the threshold can no longer be met.
    pub fail_fast: bool,

    /// Stop running repeats once the threshold has been met.
    pub pass_fast: bool,
}

impl Policy {
    /// Creates a new policy with fail-fast and pass-fast turned off.
    pub fn new(id: impl Into<PolicyId>, at_least: u32, out_of: u32) -> Self {
        Self {
            id: id.into(),
            at_least,
            out_of,
            fail_fast: false,
            pass_fast: false,
        }
    }

    /// Sets fail-fast on this policy.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Sets pass-fast on this policy.
    pub fn with_pass_fast(mut self, pass_fast: bool) -> Self {
        self.pass_fast = pass_fast;
        self
    }

    /// Returns true if this policy disables the test: zero runs are performed.
    pub fn is_disabled(&self) -> bool {
        self.out_of == 0
    }

    /// Returns true if this policy is equivalent to running the test natively, once.
    pub fn is_redundant(&self) -> bool {
        self.out_of == 1 && self.at_least >= 1
    }

    /// Returns the number of failed runs that can be absorbed while still meeting the threshold.
    ///
    /// This is negative if `at_least > out_of`.
    pub fn allowed_failures(&self) -> i64 {
        i64::from(self.out_of) - i64::from(self.at_least)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}/{}", self.id, self.at_least, self.out_of)
    }
}
