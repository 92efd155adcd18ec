// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Plan, PlanFallback, PlanId, PlanRule, Policy, PolicyId, PolicyResolver};
use crate::errors::{ConfigParseError, ConfigParseErrorKind, FallbackError, PlanRuleError};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, File, FileFormat};
use indexmap::{IndexMap, map::Entry};
use petgraph::{Directed, Graph, algo::scc::kosaraju_scc, graph::NodeIndex};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// This allows warnings to be logged (the default) or collected in tests.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>);
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the tracing crate.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
        let mut unknown_str = String::new();
        if unknown.len() == 1 {
            // Print this on the same line.
            unknown_str.push_str("key: ");
            unknown_str.push_str(unknown.iter().next().map_or("", |key| key.as_str()));
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                unknown_str.push('\n');
                unknown_str.push_str("  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        warn!("in config file {config_file}, ignoring unknown configuration {unknown_str}");
    }
}

/// The file format of a stochastics config file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigFormat {
    /// TOML, the default.
    Toml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Guesses the format from a file's extension, defaulting to TOML.
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    fn file_format(self) -> FileFormat {
        match self {
            Self::Toml => FileFormat::Toml,
            Self::Json => FileFormat::Json,
        }
    }
}

/// A rule whose pattern has been compiled.
#[derive(Clone, Debug)]
pub(super) struct CompiledRule {
    pub(super) policy: PolicyId,
    pub(super) pattern: Regex,
}

/// The closed set of plans, policies and fallbacks for a session.
///
/// A `StochasticConfig` is validated on construction: every rule refers to a
/// known policy, every pattern compiles, and the fallback graph is a forest
/// rooted at plans without a parent.
#[derive(Clone, Debug)]
pub struct StochasticConfig {
    policies: IndexMap<PolicyId, Policy>,
    plans: IndexMap<PlanId, Vec<CompiledRule>>,
    fallbacks: IndexMap<PlanId, PlanId>,
}

impl StochasticConfig {
    /// The default location of the config file, relative to the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/stochastics.toml";

    /// Reads the config from the default location under `workspace_root`.
    ///
    /// Returns `Ok(None)` if no config file exists there.
    pub fn from_workspace_root(
        workspace_root: &Utf8Path,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Option<Self>, ConfigParseError> {
        let config_file = workspace_root.join(Self::CONFIG_PATH);
        if !config_file.exists() {
            return Ok(None);
        }
        Self::from_file(&config_file, warnings).map(Some)
    }

    /// Reads the config from the given file. The format is picked from the file extension.
    pub fn from_file(
        config_file: &Utf8Path,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let format = ConfigFormat::from_path(config_file);
        let source = File::new(config_file.as_str(), format.file_format());
        Self::from_source(config_file, source, warnings)
    }

    /// Parses the config from a string.
    ///
    /// `config_file` is only used for error messages and warnings.
    pub fn from_str_with_format(
        config_file: impl Into<Utf8PathBuf>,
        contents: &str,
        format: ConfigFormat,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let config_file = config_file.into();
        let source = File::from_str(contents, format.file_format());
        Self::from_source(&config_file, source, warnings)
    }

    /// Builds a config from already-parsed plans, policies and fallbacks.
    pub fn from_parts(
        plans: impl IntoIterator<Item = Plan>,
        policies: impl IntoIterator<Item = Policy>,
        fallbacks: impl IntoIterator<Item = PlanFallback>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let policies: IndexMap<_, _> = policies
            .into_iter()
            .map(|policy| (policy.id.clone(), policy))
            .collect();

        let mut rule_errors = Vec::new();
        let mut compiled_plans: IndexMap<PlanId, Vec<CompiledRule>> = IndexMap::new();
        for plan in plans {
            let rules = compiled_plans.entry(plan.id.clone()).or_default();
            for PlanRule {
                plan,
                policy,
                test_pattern,
            } in plan.rules
            {
                if !policies.contains_key(&policy) {
                    rule_errors.push(PlanRuleError::UnknownPolicy {
                        plan: plan.clone(),
                        policy: policy.clone(),
                    });
                }
                match Regex::new(&test_pattern) {
                    Ok(pattern) => rules.push(CompiledRule { policy, pattern }),
                    Err(err) => rule_errors.push(PlanRuleError::InvalidPattern {
                        plan,
                        pattern: test_pattern,
                        message: err.to_string(),
                    }),
                }
            }
        }

        if !rule_errors.is_empty() {
            return Err(ConfigParseErrorKind::InvalidRules(rule_errors));
        }

        let fallbacks = Self::sanitize_fallbacks(&compiled_plans, fallbacks)?;

        Ok(Self {
            policies,
            plans: compiled_plans,
            fallbacks,
        })
    }

    /// Returns a resolver for the given active plan.
    pub fn resolver(&self, plan: impl Into<PlanId>) -> PolicyResolver<'_> {
        PolicyResolver::new(self, plan.into())
    }

    /// Returns the policy with the given name.
    pub fn policy(&self, id: &str) -> Option<&Policy> {
        self.policies.get(id)
    }

    /// Iterates over all policies, in declaration order.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> + '_ {
        self.policies.values()
    }

    /// Iterates over the names of all plans that have rules, in declaration order.
    pub fn plans(&self) -> impl Iterator<Item = &PlanId> + '_ {
        self.plans.keys()
    }

    /// Returns the plan with the given name, with its rules in declaration order.
    pub fn plan(&self, id: &str) -> Option<Plan> {
        let (id, rules) = self.plan_rules(id)?;
        Some(Plan::new(
            id.clone(),
            rules
                .iter()
                .map(|rule| (rule.policy.clone(), rule.pattern.as_str().to_owned())),
        ))
    }

    /// Returns true if the plan is known, either because it has rules or because
    /// it overrides another plan.
    pub fn has_plan(&self, id: &str) -> bool {
        self.plans.contains_key(id) || self.fallbacks.contains_key(id)
    }

    /// Returns the plan that `plan` falls back to, if any.
    pub fn fallback(&self, plan: &str) -> Option<&PlanId> {
        self.fallbacks.get(plan)
    }

    pub(super) fn plan_rules(&self, plan: &str) -> Option<(&PlanId, &[CompiledRule])> {
        self.plans
            .get_key_value(plan)
            .map(|(id, rules)| (id, rules.as_slice()))
    }

    // ---
    // Helper methods
    // ---

    fn from_source(
        config_file: &Utf8Path,
        source: impl config::Source + Send + Sync + 'static,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let config = Config::builder()
            .add_source(source)
            .build()
            .map_err(|error| {
                ConfigParseError::new(config_file, ConfigParseErrorKind::BuildError(Box::new(error)))
            })?;

        let (deserialized, unknown) = Self::deserialize_config(config)
            .map_err(|kind| ConfigParseError::new(config_file, kind))?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(config_file, &unknown);
        }

        let (plans, policies, fallbacks) = deserialized.into_parts();
        Self::from_parts(plans, policies, fallbacks)
            .map_err(|kind| ConfigParseError::new(config_file, kind))
    }

    fn deserialize_config(
        config: Config,
    ) -> Result<(StochasticConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: StochasticConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // Both serde_path_to_error and the config crate report the key. Drop the key from
                // the config error for consistency.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }

    /// Checks the fallback edges and reports every problem found.
    fn sanitize_fallbacks(
        plans: &IndexMap<PlanId, Vec<CompiledRule>>,
        fallbacks: impl IntoIterator<Item = PlanFallback>,
    ) -> Result<IndexMap<PlanId, PlanId>, ConfigParseErrorKind> {
        let mut errors = Vec::new();
        let mut edges: IndexMap<PlanId, PlanId> = IndexMap::new();

        for PlanFallback { plan, overrides } in fallbacks {
            if plan.is_root() {
                errors.push(FallbackError::RootPlanFallback(plan.to_string()));
                continue;
            }
            if plan == overrides {
                errors.push(FallbackError::SelfReferentialFallback(plan.to_string()));
                continue;
            }
            match edges.entry(plan) {
                Entry::Occupied(entry) => {
                    errors.push(FallbackError::DuplicateFallback(
                        entry.key().to_string(),
                        entry.get().to_string(),
                        overrides.to_string(),
                    ));
                }
                Entry::Vacant(entry) => {
                    entry.insert(overrides);
                }
            }
        }

        // A plan is known if it has rules, overrides another plan, or is the root.
        for (plan, overrides) in &edges {
            if !overrides.is_root()
                && !plans.contains_key(overrides)
                && !edges.contains_key(overrides)
            {
                errors.push(FallbackError::UnknownFallback(
                    plan.to_string(),
                    overrides.to_string(),
                ));
            }
        }

        Self::check_fallback_cycles(&edges, &mut errors);

        if errors.is_empty() {
            Ok(edges)
        } else {
            Err(ConfigParseErrorKind::FallbackErrors(errors))
        }
    }

    /// Reports all cycles within the fallback graph using Kosaraju's algorithm.
    fn check_fallback_cycles(
        edges: &IndexMap<PlanId, PlanId>,
        errors: &mut Vec<FallbackError>,
    ) {
        let mut graph = Graph::<&str, (), Directed>::new();
        let mut node_map: HashMap<&str, NodeIndex> = HashMap::new();

        for (plan, overrides) in edges {
            let from_node = *node_map
                .entry(plan.as_str())
                .or_insert_with(|| graph.add_node(plan.as_str()));
            let to_node = *node_map
                .entry(overrides.as_str())
                .or_insert_with(|| graph.add_node(overrides.as_str()));
            graph.add_edge(from_node, to_node, ());
        }

        let sccs: Vec<Vec<String>> = kosaraju_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() >= 2)
            .map(|scc| {
                let mut names: Vec<String> =
                    scc.iter().map(|idx| graph[*idx].to_string()).collect();
                names.sort_unstable();
                names
            })
            .collect();

        if !sccs.is_empty() {
            errors.push(FallbackError::FallbackCycle(sccs));
        }
    }
}

// This is the form of `StochasticConfig` that gets deserialized.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StochasticConfigDeserialize {
    #[serde(default)]
    policies: IndexMap<PolicyId, DeserializedPolicy>,
    #[serde(default)]
    plans: IndexMap<PlanId, DeserializedPlan>,
}

impl StochasticConfigDeserialize {
    fn into_parts(self) -> (Vec<Plan>, Vec<Policy>, Vec<PlanFallback>) {
        let policies = self
            .policies
            .into_iter()
            .map(|(id, policy)| Policy {
                id,
                at_least: policy.at_least,
                out_of: policy.out_of,
                fail_fast: policy.fail_fast,
                pass_fast: policy.pass_fast,
            })
            .collect();

        let mut plans = Vec::with_capacity(self.plans.len());
        let mut fallbacks = Vec::new();
        for (id, plan) in self.plans {
            if let Some(overrides) = plan.overrides {
                fallbacks.push(PlanFallback {
                    plan: id.clone(),
                    overrides,
                });
            }
            let rules = plan
                .rules
                .into_iter()
                .flat_map(|rule| {
                    let plan = id.clone();
                    rule.tests
                        .into_iter()
                        .map(move |test_pattern| PlanRule {
                            plan: plan.clone(),
                            policy: rule.policy.clone(),
                            test_pattern,
                        })
                })
                .collect();
            plans.push(Plan { id, rules });
        }

        (plans, policies, fallbacks)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedPolicy {
    at_least: u32,
    out_of: u32,
    #[serde(default)]
    fail_fast: bool,
    #[serde(default)]
    pass_fast: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedPlan {
    #[serde(default)]
    overrides: Option<PlanId>,
    #[serde(default)]
    rules: Vec<DeserializedRule>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedRule {
    policy: PolicyId,
    tests: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use test_case::test_case;

    #[derive(Default)]
    struct CollectWarnings {
        unknown: Vec<BTreeSet<String>>,
    }

    impl ConfigWarnings for CollectWarnings {
        fn unknown_config_keys(&mut self, _config_file: &Utf8Path, unknown: &BTreeSet<String>) {
            self.unknown.push(unknown.clone());
        }
    }

    fn parse_toml(contents: &str) -> Result<StochasticConfig, ConfigParseError> {
        StochasticConfig::from_str_with_format(
            "stochastics.toml",
            contents,
            ConfigFormat::Toml,
            &mut CollectWarnings::default(),
        )
    }

    #[test]
    fn parse_valid_toml() {
        let config_contents = indoc! {r#"
            [policies.flaky]
            at-least = 2
            out-of = 3
            fail-fast = true
            pass-fast = true

            [policies.lenient]
            at-least = 1
            out-of = 5

            [plans.main]
            rules = [
                { policy = "flaky", tests = ["^net::", "retry_"] },
                { policy = "lenient", tests = ["timing"] },
            ]

            [plans.feature]
            overrides = "main"
        "#};

        let config = parse_toml(config_contents).expect("config is valid");

        assert_eq!(
            config.policy("flaky"),
            Some(&Policy {
                id: PolicyId::new("flaky"),
                at_least: 2,
                out_of: 3,
                fail_fast: true,
                pass_fast: true,
            })
        );
        assert_eq!(
            config.policy("lenient"),
            Some(&Policy::new("lenient", 1, 5)),
            "fail-fast and pass-fast default to false"
        );

        let (_, rules) = config.plan_rules("main").expect("main plan exists");
        let rules: Vec<_> = rules
            .iter()
            .map(|rule| (rule.policy.as_str(), rule.pattern.as_str()))
            .collect();
        assert_eq!(
            rules,
            vec![("flaky", "^net::"), ("flaky", "retry_"), ("lenient", "timing")],
            "rules are flattened in declaration order"
        );

        assert_eq!(config.fallback("feature").map(PlanId::as_str), Some("main"));
        assert!(config.has_plan("feature"), "plans with only a fallback are known");
        assert!(!config.has_plan("unknown"));
    }

    #[test]
    fn parse_valid_json() {
        let config_contents = r#"{
            "policies": { "flaky": { "at-least": 1, "out-of": 2 } },
            "plans": {
                "main": { "rules": [ { "policy": "flaky", "tests": ["::test_flaky$"] } ] }
            }
        }"#;

        let config = StochasticConfig::from_str_with_format(
            "stochastics.json",
            config_contents,
            ConfigFormat::Json,
            &mut CollectWarnings::default(),
        )
        .expect("config is valid");
        assert_eq!(config.policy("flaky"), Some(&Policy::new("flaky", 1, 2)));
        assert_eq!(config.plan_rules("main").map(|(_, rules)| rules.len()), Some(1));
    }

    #[test]
    fn unknown_keys_are_reported() {
        let config_contents = indoc! {r#"
            [policies.flaky]
            at-least = 1
            out-of = 2
            retries = 3

            [plans.main]
            colour = "blue"
        "#};

        let mut warnings = CollectWarnings::default();
        StochasticConfig::from_str_with_format(
            "stochastics.toml",
            config_contents,
            ConfigFormat::Toml,
            &mut warnings,
        )
        .expect("unknown keys are not fatal");

        let expected: BTreeSet<String> = ["plans.main.colour", "policies.flaky.retries"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(warnings.unknown, vec![expected]);
    }

    #[test]
    fn negative_counts_are_rejected() {
        let config_contents = indoc! {r#"
            [policies.flaky]
            at-least = -1
            out-of = 2
        "#};

        let error = parse_toml(config_contents).expect_err("negative at-least is invalid");
        match error.kind() {
            ConfigParseErrorKind::DeserializeError(error) => {
                assert_eq!(error.path().to_string(), "policies.flaky.at-least");
            }
            other => panic!("expected a deserialize error, found {other}"),
        }
    }

    #[test]
    fn invalid_rules_are_collected() {
        let config_contents = indoc! {r#"
            [policies.flaky]
            at-least = 1
            out-of = 2

            [plans.main]
            rules = [
                { policy = "missing", tests = ["ok"] },
                { policy = "flaky", tests = ["(unclosed"] },
            ]
        "#};

        let error = parse_toml(config_contents).expect_err("rules are invalid");
        match error.kind() {
            ConfigParseErrorKind::InvalidRules(errors) => {
                assert_eq!(errors.len(), 2, "both errors reported: {errors:?}");
                assert_eq!(
                    errors[0],
                    PlanRuleError::UnknownPolicy {
                        plan: PlanId::new("main"),
                        policy: PolicyId::new("missing"),
                    }
                );
                assert!(
                    matches!(
                        &errors[1],
                        PlanRuleError::InvalidPattern { pattern, .. } if pattern == "(unclosed"
                    ),
                    "unexpected error {:?}",
                    errors[1]
                );
            }
            other => panic!("expected invalid rules, found {other}"),
        }
    }

    #[test_case(
        vec![("default", "main")],
        vec![FallbackError::RootPlanFallback("default".to_owned())]
        ; "root plan cannot fall back"
    )]
    #[test_case(
        vec![("main", "main")],
        vec![FallbackError::SelfReferentialFallback("main".to_owned())]
        ; "self-referential fallback"
    )]
    #[test_case(
        vec![("feature", "nonexistent")],
        vec![FallbackError::UnknownFallback("feature".to_owned(), "nonexistent".to_owned())]
        ; "unknown parent"
    )]
    #[test_case(
        vec![("feature", "main"), ("feature", "release")],
        vec![FallbackError::DuplicateFallback(
            "feature".to_owned(), "main".to_owned(), "release".to_owned(),
        )]
        ; "two parents"
    )]
    #[test_case(
        vec![("a", "b"), ("b", "c"), ("c", "a"), ("d", "default")],
        vec![FallbackError::FallbackCycle(vec![vec![
            "a".to_owned(), "b".to_owned(), "c".to_owned(),
        ]])]
        ; "cycle"
    )]
    fn fallback_errors(edges: Vec<(&str, &str)>, expected: Vec<FallbackError>) {
        let plans = [Plan::new("main", [("flaky", "x")])];
        let policies = [Policy::new("flaky", 1, 2)];
        let fallbacks = edges
            .into_iter()
            .map(|(plan, overrides)| PlanFallback::new(plan, overrides));

        let error = StochasticConfig::from_parts(plans, policies, fallbacks)
            .expect_err("fallbacks are invalid");
        match error {
            ConfigParseErrorKind::FallbackErrors(errors) => {
                let actual: HashSet<_> = errors.into_iter().collect();
                let expected: HashSet<_> = expected.into_iter().collect();
                assert_eq!(actual, expected);
            }
            other => panic!("expected fallback errors, found {other}"),
        }
    }

    #[test]
    fn fallback_to_root_is_valid_without_definition() {
        let config = StochasticConfig::from_parts(
            [Plan::new("main", [("flaky", "x")])],
            [Policy::new("flaky", 1, 2)],
            [PlanFallback::new("main", "default")],
        )
        .expect("falling back to the root plan is valid");
        assert_eq!(config.fallback("main").map(PlanId::as_str), Some("default"));
    }

    #[test]
    fn from_workspace_root_missing_file() {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let config =
            StochasticConfig::from_workspace_root(dir.path(), &mut CollectWarnings::default())
                .expect("missing config is not an error");
        assert!(config.is_none());
    }

    #[test]
    fn from_workspace_root_reads_file() {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let config_dir = dir.path().join(".config");
        std::fs::create_dir_all(&config_dir).expect("config dir created");
        std::fs::write(
            config_dir.join("stochastics.toml"),
            indoc! {r#"
                [policies.flaky]
                at-least = 1
                out-of = 3
            "#},
        )
        .expect("config written");

        let config =
            StochasticConfig::from_workspace_root(dir.path(), &mut CollectWarnings::default())
                .expect("config is valid")
                .expect("config exists");
        assert_eq!(config.policy("flaky"), Some(&Policy::new("flaky", 1, 3)));
    }
}
