// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::PolicyId;
use serde::Deserialize;
use std::{borrow::Borrow, fmt};

/// The name of a plan.
///
/// [`PlanId::DEFAULT`] is the root of every fallback chain.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    /// The name of the root plan.
    pub const DEFAULT: &'static str = "default";

    /// Creates a new plan identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the root plan identifier.
    pub fn default_plan() -> Self {
        Self::new(Self::DEFAULT)
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the root plan.
    pub fn is_root(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PlanId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlanId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PlanId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Assigns a policy to the tests matching a pattern, within a plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanRule {
    /// The plan this rule belongs to.
    pub plan: PlanId,

    /// The policy to apply.
    pub policy: PolicyId,

    /// A regular expression searched for anywhere in the test identifier.
    pub test_pattern: String,
}

impl PlanRule {
    /// Creates a new rule.
    pub fn new(
        plan: impl Into<PlanId>,
        policy: impl Into<PolicyId>,
        test_pattern: impl Into<String>,
    ) -> Self {
        Self {
            plan: plan.into(),
            policy: policy.into(),
            test_pattern: test_pattern.into(),
        }
    }
}

/// Declares that `plan` falls back to `overrides` when none of its rules match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanFallback {
    /// The child plan.
    pub plan: PlanId,

    /// The parent plan.
    pub overrides: PlanId,
}

impl PlanFallback {
    /// Creates a new fallback edge.
    pub fn new(plan: impl Into<PlanId>, overrides: impl Into<PlanId>) -> Self {
        Self {
            plan: plan.into(),
            overrides: overrides.into(),
        }
    }
}

/// A named, ordered collection of rules. The first matching rule wins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Plan {
    /// The name of the plan.
    pub id: PlanId,

    /// The rules, in declaration order.
    pub rules: Vec<PlanRule>,
}

impl Plan {
    /// Creates a new plan from `(policy, pattern)` pairs.
    pub fn new<P, T>(id: impl Into<PlanId>, rules: impl IntoIterator<Item = (P, T)>) -> Self
    where
        P: Into<PolicyId>,
        T: Into<String>,
    {
        let id = id.into();
        let rules = rules
            .into_iter()
            .map(|(policy, pattern)| PlanRule::new(id.clone(), policy, pattern))
            .collect();
        Self { id, rules }
    }
}
