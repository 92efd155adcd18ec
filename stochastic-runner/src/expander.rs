// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expanding logical tests into physical invocations.
//!
//! Each test discovered by a host is passed through an [`InvocationExpander`].
//! Tests not covered by the active plan, or covered by a policy equivalent to
//! a single native run, are left alone. Tests covered by a disabled policy
//! are dropped. Every other test is replaced by `out_of` tagged copies per
//! variant.

use crate::{
    config::{Policy, PolicyResolver},
    controller::ExecutionController,
};
use std::{collections::BTreeMap, fmt};
use tracing::{debug, info};

/// The name of a physical invocation.
///
/// Repeats of a stochastic test carry a suffix of the form
/// `[::<policy>#<index>_of_<total>]` after the name of the variant they repeat.
/// The variant name is the key of the stochastic group. Invocations without
/// the suffix are native tests.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InvocationName {
    group: String,
    repeat: Option<Repeat>,
}

/// The tag carried by a repeat of a stochastic test.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Repeat {
    /// The name of the policy the repeat runs under.
    pub policy: String,

    /// The 1-based index of this repeat.
    pub index: u32,

    /// The total number of repeats in the group.
    pub total: u32,
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}#{:02}_of_{:02}]",
            InvocationName::SUFFIX_START,
            self.policy,
            self.index,
            self.total
        )
    }
}

impl InvocationName {
    const SUFFIX_START: &'static str = "[::";

    /// Creates the name of a test that runs natively.
    pub fn native(id: impl Into<String>) -> Self {
        Self {
            group: id.into(),
            repeat: None,
        }
    }

    /// Creates the name of a repeat within a stochastic group.
    pub fn repeat(group: impl Into<String>, policy: impl Into<String>, index: u32, total: u32) -> Self {
        Self {
            group: group.into(),
            repeat: Some(Repeat {
                policy: policy.into(),
                index,
                total,
            }),
        }
    }

    /// Parses a physical name back into its parts.
    ///
    /// Names that don't carry a well-formed suffix are treated as native.
    pub fn parse(name: &str) -> Self {
        Self::parse_repeat(name).unwrap_or_else(|| Self::native(name))
    }

    fn parse_repeat(name: &str) -> Option<Self> {
        let body = name.strip_suffix(']')?;
        let start = body.rfind(Self::SUFFIX_START)?;
        let (group, tag) = (&body[..start], &body[start + Self::SUFFIX_START.len()..]);
        let (policy, counts) = tag.rsplit_once('#')?;
        let (index, total) = counts.split_once("_of_")?;
        if group.is_empty() || policy.is_empty() {
            return None;
        }
        Some(Self::repeat(group, policy, index.parse().ok()?, total.parse().ok()?))
    }

    /// Returns the group key: the name without the repeat suffix.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the repeat tag, or `None` for a native test.
    pub fn repeat_tag(&self) -> Option<&Repeat> {
        self.repeat.as_ref()
    }

    /// Returns true if this invocation belongs to a stochastic group.
    pub fn is_stochastic(&self) -> bool {
        self.repeat.is_some()
    }
}

impl fmt::Display for InvocationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group)?;
        if let Some(repeat) = &self.repeat {
            write!(f, "{repeat}")?;
        }
        Ok(())
    }
}

/// A test as discovered by a host, before expansion.
#[derive(Clone, Debug)]
pub struct LogicalTest<I> {
    /// The scope the test was found in, for example a test binary.
    pub scope: String,

    /// The name of the test within its scope.
    pub name: String,

    /// The variants of the test. Unparametrized tests have exactly one
    /// variant, whose id is the test id.
    pub variants: Vec<TestVariant<I>>,
}

impl<I> LogicalTest<I> {
    /// Creates an unparametrized test.
    pub fn new(scope: impl Into<String>, name: impl Into<String>, item: I) -> Self {
        let mut test = Self {
            scope: scope.into(),
            name: name.into(),
            variants: Vec::new(),
        };
        let id = test.id();
        test.variants.push(TestVariant { id, item });
        test
    }

    /// Creates a test with parameter cases. Each case is identified by
    /// `<test id>[<case>]`.
    pub fn with_cases(
        scope: impl Into<String>,
        name: impl Into<String>,
        cases: impl IntoIterator<Item = (String, I)>,
    ) -> Self {
        let mut test = Self {
            scope: scope.into(),
            name: name.into(),
            variants: Vec::new(),
        };
        let id = test.id();
        test.variants = cases
            .into_iter()
            .map(|(case, item)| TestVariant {
                id: format!("{id}[{case}]"),
                item,
            })
            .collect();
        test
    }

    /// Returns the identifier policies are resolved against: `<scope>::<name>`.
    pub fn id(&self) -> String {
        if self.scope.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.scope, self.name)
        }
    }

    /// Turns every variant into a native invocation.
    pub fn into_native_invocations(self) -> Vec<Invocation<I>> {
        let original = self.id();
        self.variants
            .into_iter()
            .map(|variant| Invocation {
                name: InvocationName::native(variant.id),
                original: original.clone(),
                item: variant.item,
            })
            .collect()
    }
}

/// A single variant of a logical test.
#[derive(Clone, Debug)]
pub struct TestVariant<I> {
    /// The unique identifier of this variant.
    pub id: String,

    /// The host's handle for running the variant.
    pub item: I,
}

/// A physical invocation: one run of one variant.
#[derive(Clone, Debug)]
pub struct Invocation<I> {
    /// The physical name of the invocation.
    pub name: InvocationName,

    /// The id of the logical test this invocation came from.
    pub original: String,

    /// The host's handle for running the invocation.
    pub item: I,
}

/// What the expander did with a discovered test.
#[derive(Clone, Debug)]
pub enum DiscoveryResult<I> {
    /// The test is left to the host, unmodified.
    None,

    /// The test was replaced by a single tagged invocation.
    Single(Invocation<I>),

    /// The test was replaced by a list of tagged invocations. An empty list
    /// means the test is disabled.
    Many(Vec<Invocation<I>>),
}

impl<I> DiscoveryResult<I> {
    /// Returns the invocations to schedule, using `test` for tests left to the host.
    pub fn into_invocations(self, test: LogicalTest<I>) -> Vec<Invocation<I>> {
        match self {
            Self::None => test.into_native_invocations(),
            Self::Single(invocation) => vec![invocation],
            Self::Many(invocations) => invocations,
        }
    }
}

/// Replaces covered tests with their repeats and records each group's policy.
#[derive(Debug)]
pub struct InvocationExpander<'cfg> {
    resolver: Option<PolicyResolver<'cfg>>,
    groups: BTreeMap<String, Policy>,
    covered: usize,
}

impl<'cfg> InvocationExpander<'cfg> {
    /// Creates an expander that resolves policies through `resolver`.
    pub fn new(resolver: PolicyResolver<'cfg>) -> Self {
        Self {
            resolver: Some(resolver),
            groups: BTreeMap::new(),
            covered: 0,
        }
    }

    /// Creates an expander that leaves every test alone.
    pub fn inert() -> Self {
        Self {
            resolver: None,
            groups: BTreeMap::new(),
            covered: 0,
        }
    }

    /// Returns the resolver, if any.
    pub fn resolver(&self) -> Option<&PolicyResolver<'cfg>> {
        self.resolver.as_ref()
    }

    /// Expands a discovered test.
    pub fn expand<I: Clone>(&mut self, test: &LogicalTest<I>) -> DiscoveryResult<I> {
        let Some(resolver) = &self.resolver else {
            return DiscoveryResult::None;
        };

        let id = test.id();
        let Some(policy) = resolver.resolve(&id) else {
            debug!("{id}: no policy found, not wrapping");
            return DiscoveryResult::None;
        };

        if policy.is_redundant() {
            debug!("{id}: policy {policy} is a single native run, not wrapping");
            return DiscoveryResult::None;
        }

        self.covered += 1;
        if policy.is_disabled() {
            info!("{id}: disabled by policy {policy}");
            return DiscoveryResult::Many(Vec::new());
        }

        info!(
            "wrapping stochastic test `{id}` with policy `{}` [{}/{}]",
            policy.id, policy.at_least, policy.out_of
        );

        for variant in &test.variants {
            self.groups.insert(variant.id.clone(), policy.clone());
        }

        // All variants' first repeat runs before any variant's second repeat.
        let mut invocations = Vec::with_capacity(test.variants.len() * policy.out_of as usize);
        for index in 1..=policy.out_of {
            for variant in &test.variants {
                invocations.push(Invocation {
                    name: InvocationName::repeat(
                        variant.id.clone(),
                        policy.id.as_str(),
                        index,
                        policy.out_of,
                    ),
                    original: id.clone(),
                    item: variant.item.clone(),
                });
            }
        }

        if invocations.len() == 1 {
            DiscoveryResult::Single(invocations.remove(0))
        } else {
            DiscoveryResult::Many(invocations)
        }
    }

    /// Returns the number of logical tests covered by a non-trivial policy,
    /// including disabled ones.
    pub fn covered_count(&self) -> usize {
        self.covered
    }

    /// Returns the policy registered for a group.
    pub fn group_policy(&self, group: &str) -> Option<&Policy> {
        self.groups.get(group)
    }

    /// Hands the registered groups over to a controller.
    pub fn into_controller(self) -> ExecutionController {
        ExecutionController::new(self.groups)
    }
}
