// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{PlanId, Policy, StochasticConfig};
use itertools::Itertools;
use std::collections::HashSet;
use tracing::debug;

/// Maps test identifiers to policies for one active plan.
///
/// Resolution is a pure function of the config, the active plan and the test
/// identifier: resolving the same test twice always yields the same policy.
#[derive(Clone, Debug)]
pub struct PolicyResolver<'cfg> {
    config: &'cfg StochasticConfig,
    // The active plan followed by its ancestors.
    chain: Vec<PlanId>,
}

/// A resolved policy along with where it came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedPolicy<'cfg> {
    /// The policy.
    pub policy: &'cfg Policy,

    /// The plan whose rule matched.
    pub plan: &'cfg PlanId,

    /// The index of the matching rule within that plan.
    pub rule_index: usize,

    /// The pattern of the matching rule.
    pub pattern: &'cfg str,
}

impl<'cfg> PolicyResolver<'cfg> {
    pub(super) fn new(config: &'cfg StochasticConfig, plan: PlanId) -> Self {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut curr = Some(plan);

        // Cycles are rejected when the config is loaded; the visited set keeps the walk finite
        // regardless.
        while let Some(plan) = curr.take() {
            if !visited.insert(plan.clone()) {
                break;
            }
            if !plan.is_root() {
                curr = config.fallback(plan.as_str()).cloned();
            }
            chain.push(plan);
        }

        Self { config, chain }
    }

    /// Returns the active plan.
    pub fn plan(&self) -> &PlanId {
        &self.chain[0]
    }

    /// Returns the active plan followed by the plans it falls back to, in order.
    pub fn plan_chain(&self) -> &[PlanId] {
        &self.chain
    }

    /// Returns the policy that applies to `test`, or `None` if the test is not covered.
    pub fn resolve(&self, test: &str) -> Option<&'cfg Policy> {
        self.resolve_with_source(test).map(|resolved| resolved.policy)
    }

    /// Returns the policy that applies to `test` along with the plan and rule that matched.
    ///
    /// Plans are tried in chain order. Within a plan, the first rule whose pattern matches
    /// anywhere in `test` wins.
    pub fn resolve_with_source(&self, test: &str) -> Option<ResolvedPolicy<'cfg>> {
        let config = self.config;
        for plan in &self.chain {
            let Some((plan, rules)) = config.plan_rules(plan.as_str()) else {
                continue;
            };
            let matched = rules
                .iter()
                .enumerate()
                .find(|(_, rule)| rule.pattern.is_match(test));
            if let Some((rule_index, rule)) = matched {
                let Some(policy) = config.policy(rule.policy.as_str()) else {
                    // Rules referring to unknown policies are rejected at load time.
                    continue;
                };
                debug!("{test}: matched `{}` in plan `{plan}` -> {policy}", rule.pattern);
                return Some(ResolvedPolicy {
                    policy,
                    plan,
                    rule_index,
                    pattern: rule.pattern.as_str(),
                });
            }
        }

        debug!("{test}: no matching rule in plans [{}]", self.chain.iter().join(", "));
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Plan, PlanFallback};
    use test_case::test_case;

    fn three_level_config() -> StochasticConfig {
        StochasticConfig::from_parts(
            [
                Plan::new("child", [("child-policy", "^suite::only_child")]),
                Plan::new(
                    "parent",
                    [
                        ("parent-policy", "suite::shared"),
                        ("parent-later", "suite::shared_and_later"),
                    ],
                ),
                Plan::new("default", [("root-policy", "suite::")]),
            ],
            [
                Policy::new("child-policy", 1, 2),
                Policy::new("parent-policy", 2, 3),
                Policy::new("parent-later", 4, 5),
                Policy::new("root-policy", 1, 4),
            ],
            [
                PlanFallback::new("child", "parent"),
                PlanFallback::new("parent", "default"),
            ],
        )
        .expect("config is valid")
    }

    #[test]
    fn plan_chain() {
        let config = three_level_config();
        let resolver = config.resolver("child");
        let chain: Vec<_> = resolver.plan_chain().iter().map(PlanId::as_str).collect();
        assert_eq!(chain, ["child", "parent", "default"]);
        assert_eq!(resolver.plan().as_str(), "child");
    }

    #[test_case("suite::only_child" => Some("child-policy".to_owned()); "own rule wins")]
    #[test_case("suite::shared" => Some("parent-policy".to_owned()); "falls back to parent")]
    #[test_case(
        "suite::shared_and_later" => Some("parent-policy".to_owned());
        "first rule in order wins"
    )]
    #[test_case("suite::other" => Some("root-policy".to_owned()); "falls back to root")]
    #[test_case("elsewhere::test" => None; "not covered")]
    fn resolve_through_fallbacks(test: &str) -> Option<String> {
        let config = three_level_config();
        let resolver = config.resolver("child");
        resolver.resolve(test).map(|policy| policy.id.to_string())
    }

    #[test]
    fn resolve_with_source() {
        let config = three_level_config();
        let resolver = config.resolver("child");
        let resolved = resolver
            .resolve_with_source("suite::shared_and_later")
            .expect("test is covered");
        assert_eq!(resolved.plan.as_str(), "parent");
        assert_eq!(resolved.rule_index, 0);
        assert_eq!(resolved.pattern, "suite::shared");
    }

    #[test]
    fn unknown_plan_without_fallback_is_not_covered() {
        let config = three_level_config();
        let resolver = config.resolver("feature/unknown");
        assert_eq!(resolver.plan_chain(), [PlanId::new("feature/unknown")]);
        assert_eq!(resolver.resolve("suite::other"), None);
    }

    #[test]
    fn root_plan_stops_the_chain() {
        let config = three_level_config();
        let resolver = config.resolver("default");
        assert_eq!(resolver.plan_chain(), [PlanId::default_plan()]);
        assert_eq!(
            resolver.resolve("suite::shared").map(|p| p.id.as_str()),
            Some("root-policy")
        );
    }

    #[test]
    fn patterns_are_not_anchored() {
        let config = StochasticConfig::from_parts(
            [Plan::new("main", [("p", "flaky")])],
            [Policy::new("p", 1, 3)],
            [],
        )
        .expect("config is valid");
        let resolver = config.resolver("main");
        assert!(resolver.resolve("net::test_flaky_socket").is_some());
        assert!(resolver.resolve("net::test_stable").is_none());
    }

    #[test]
    fn resolution_is_idempotent() {
        let config = three_level_config();
        let resolver = config.resolver("child");
        for test in ["suite::only_child", "suite::shared", "nope"] {
            assert_eq!(resolver.resolve(test), resolver.resolve(test));
        }
    }
}
