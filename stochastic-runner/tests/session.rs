// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end sessions: config file → harness → rectified exit code.

use camino::Utf8Path;
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};
use stochastic_runner::{
    config::{ConfigFormat, DefaultConfigWarnings, PlanId, StochasticConfig},
    exit_codes::StochasticExitCode,
    harness::{Harness, Result, TestCase},
    rectifier::Rectification,
    reporter::StochasticReporter,
    runner::SessionSummary,
};

const CONFIG: &str = indoc! {r#"
    [policies.two-of-three]
    at-least = 2
    out-of = 3
    fail-fast = true
    pass-fast = true

    [policies.once]
    at-least = 1
    out-of = 1

    [policies.off]
    at-least = 0
    out-of = 0

    [policies.lenient]
    at-least = 1
    out-of = 4
    pass-fast = true

    [plans.default]
    rules = [
        { policy = "two-of-three", tests = ["::flaky_"] },
        { policy = "once", tests = ["::single$"] },
        { policy = "off", tests = ["::quarantined$"] },
    ]

    [plans.main]
    overrides = "default"
    rules = [
        { policy = "lenient", tests = ["::net_"] },
    ]

    [plans.feature]
    overrides = "main"
"#};

fn config() -> StochasticConfig {
    StochasticConfig::from_str_with_format(
        "stochastics.toml",
        CONFIG,
        ConfigFormat::Toml,
        &mut DefaultConfigWarnings,
    )
    .expect("config is valid")
}

/// A test body that replays `outcomes`, one per call, and counts calls.
fn scripted(outcomes: &'static [bool], calls: Rc<Cell<usize>>) -> impl Fn() -> Result<()> {
    move || {
        let call = calls.get();
        calls.set(call + 1);
        if outcomes[call % outcomes.len()] {
            Ok(())
        } else {
            Err(format!("attempt {} failed", call + 1).into())
        }
    }
}

fn run(harness: Harness, plan: &str) -> (SessionSummary, String) {
    let config = config();
    let mut out = Vec::new();
    let summary = harness
        .run_with(
            Some(&config),
            PlanId::new(plan),
            &StochasticReporter::new(),
            &mut out,
        )
        .expect("session ran");
    (summary, String::from_utf8(out).expect("output is UTF-8"))
}

#[test]
fn pass_fast_stops_after_threshold() {
    let calls = Rc::new(Cell::new(0));
    let harness =
        Harness::new("suite").test(TestCase::new("flaky_pass", scripted(&[true], calls.clone())));
    let (summary, output) = run(harness, "default");

    assert_eq!(calls.get(), 2, "third repeat never runs");
    assert_eq!(summary.run_stats.skipped, 1);
    assert_eq!(summary.rectification, Rectification::Unchanged { failed: false });
    assert!(
        output.contains("StochasticSet: PASSED [2 passed out of 3]"),
        "output: {output}"
    );
}

#[test]
fn fail_fast_stops_once_threshold_is_impossible() {
    let calls = Rc::new(Cell::new(0));
    let harness = Harness::new("suite")
        .test(TestCase::new("steady", || Ok(())))
        .test(TestCase::new("flaky_fail", scripted(&[false], calls.clone())));
    let (summary, output) = run(harness, "default");

    assert_eq!(calls.get(), 2, "third repeat never runs");
    assert_eq!(summary.run_stats.groups_failed, 1);
    // The group failed and everything else passed: the failure stands.
    assert_eq!(summary.rectification, Rectification::Unchanged { failed: true });
    assert_eq!(summary.exit_code(), StochasticExitCode::TEST_RUN_FAILED);
    assert!(
        output.contains("StochasticSet: FAILED [0 passed out of 3, missing 2 passes]"),
        "output: {output}"
    );
    assert!(
        output.contains("!!! Some tests failed. Check the details above !!!"),
        "output: {output}"
    );
}

#[test]
fn redundant_policy_runs_natively() {
    let calls = Rc::new(Cell::new(0));
    let harness =
        Harness::new("suite").test(TestCase::new("single", scripted(&[false], calls.clone())));
    let (summary, output) = run(harness, "default");

    assert_eq!(calls.get(), 1);
    assert_eq!(summary.rectification, Rectification::Inert { failed: true });
    assert!(output.contains("] suite::single\n"), "output: {output}");
    assert!(!output.contains("[::once#"), "output: {output}");
}

#[test]
fn disabled_policy_removes_the_test() {
    let calls = Rc::new(Cell::new(0));
    let harness = Harness::new("suite")
        .test(TestCase::new("quarantined", scripted(&[false], calls.clone())))
        .test(TestCase::new("steady", || Ok(())));
    let (summary, output) = run(harness, "default");

    assert_eq!(calls.get(), 0);
    assert_eq!(summary.run_stats.initial_run_count, 1);
    assert!(summary.is_success());
    assert!(!output.contains("quarantined"), "output: {output}");
}

#[test]
fn absorbed_failures_override_the_exit_code() {
    let calls = Rc::new(Cell::new(0));
    let harness = Harness::new("suite")
        .test(TestCase::new("steady", || Ok(())))
        .test(TestCase::new(
            "flaky_recovers",
            scripted(&[false, true, true], calls.clone()),
        ));
    let (summary, output) = run(harness, "default");

    assert_eq!(calls.get(), 3);
    assert!(!summary.run_stats.is_success(), "raw signal is a failure");
    assert_eq!(summary.rectification, Rectification::Overridden);
    assert_eq!(summary.exit_code(), StochasticExitCode::OK);
    assert!(
        output.contains(
            "!!! Testing finished successfully. Stochastic tests failed within acceptable margins. !!!"
        ),
        "output: {output}"
    );
}

#[test]
fn fallback_chain_picks_first_plan_with_a_match() {
    let config = config();
    let resolver = config.resolver("feature");
    assert_eq!(
        resolver
            .plan_chain()
            .iter()
            .map(PlanId::as_str)
            .collect::<Vec<_>>(),
        ["feature", "main", "default"]
    );

    // `feature` has no rules, `main` covers network tests.
    let net = resolver.resolve("suite::net_connect").expect("covered");
    assert_eq!(net.id.as_str(), "lenient");
    // Falls through `main` to `default`.
    let flaky = resolver.resolve("suite::flaky_io").expect("covered");
    assert_eq!(flaky.id.as_str(), "two-of-three");
    assert_eq!(resolver.resolve("suite::steady"), None);

    // Resolution is a pure function of its inputs.
    assert_eq!(
        resolver.resolve("suite::net_connect"),
        config.resolver("feature").resolve("suite::net_connect")
    );
}

#[test]
fn plan_applies_to_parametrized_variants() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let record = seen.clone();
    let harness = Harness::new("suite").test(TestCase::with_cases(
        "net_fetch",
        [("ipv4", 4), ("ipv6", 6)],
        move |version: &u8| {
            record.borrow_mut().push(*version);
            if *version == 6 && record.borrow().len() < 3 {
                Err("no route".into())
            } else {
                Ok(())
            }
        },
    ));
    let (summary, output) = run(harness, "feature");

    // ipv4 passes at once; ipv6 fails on its first repeat, passes on its second.
    assert_eq!(*seen.borrow(), [4, 6, 6]);
    assert_eq!(summary.rectification, Rectification::Overridden);
    assert!(
        output.contains("StochasticSet: suite::net_fetch[ipv6] [lenient: 1/4]"),
        "output: {output}"
    );
}

#[test]
fn missing_default_config_runs_natively() {
    let dir = camino_tempfile::tempdir().expect("create temp dir");
    let root: &Utf8Path = dir.path();
    assert!(
        StochasticConfig::from_workspace_root(root, &mut DefaultConfigWarnings)
            .expect("no config is fine")
            .is_none()
    );

    std::fs::create_dir_all(root.join(".config")).expect("create .config");
    std::fs::write(root.join(StochasticConfig::CONFIG_PATH), CONFIG).expect("write config");
    let loaded = StochasticConfig::from_workspace_root(root, &mut DefaultConfigWarnings)
        .expect("config is valid")
        .expect("config exists");
    assert!(loaded.has_plan("feature"));
}
