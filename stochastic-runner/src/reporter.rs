// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting session events to a terminal.

use crate::{
    config::{PlanId, PolicyResolver},
    errors::{DisplayErrorChain, WriteEventError},
    expander::{Invocation, InvocationName},
    helpers::{format_duration, plural},
    rectifier::Rectification,
    runner::{InvocationStatus, RunStats, SessionEvent},
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};
use swrite::{SWrite, swrite};

const STOCHASTIC_SET: &str = "StochasticSet:";
const SUCCESS_BANNER: &str =
    "!!! Testing finished successfully. Stochastic tests failed within acceptable margins. !!!";
const FAILURE_BANNER: &str = "!!! Some tests failed. Check the details above !!!";

/// Writes session events in a human-readable form.
#[derive(Debug)]
pub struct StochasticReporter {
    styles: Styles,
    hide_success_output: bool,
}

impl StochasticReporter {
    /// Creates a new reporter with colors turned off.
    pub fn new() -> Self {
        Self {
            styles: Styles::default(),
            hide_success_output: true,
        }
    }

    /// Turns on colorized output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Also prints captured output for invocations that passed.
    pub fn set_show_success_output(&mut self, show: bool) {
        self.hide_success_output = !show;
    }

    /// Reports a session event to the given writer.
    pub fn report_event(
        &self,
        event: SessionEvent<'_>,
        writer: &mut dyn Write,
    ) -> Result<(), WriteEventError> {
        self.write_event(event, writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Writes the physical invocations that a session would run.
    pub fn write_schedule<I>(
        &self,
        plan: Option<&PlanId>,
        covered: usize,
        invocations: &[Invocation<I>],
        writer: &mut dyn Write,
    ) -> Result<(), WriteEventError> {
        self.write_plan_line(plan, covered, writer)?;
        for invocation in invocations {
            write!(writer, "    ")?;
            self.write_name(&invocation.name, writer)?;
            writeln!(writer)?;
        }
        writeln!(
            writer,
            "{} {}",
            invocations.len().style(self.styles.count),
            plural::invocations_str(invocations.len()),
        )?;
        Ok(())
    }

    /// Writes how each test resolves under the active plan.
    pub fn write_resolution<'a>(
        &self,
        resolver: &PolicyResolver<'_>,
        tests: impl IntoIterator<Item = &'a str>,
        writer: &mut dyn Write,
    ) -> Result<(), WriteEventError> {
        write!(writer, "plan chain: ")?;
        for (idx, plan) in resolver.plan_chain().iter().enumerate() {
            if idx > 0 {
                write!(writer, " -> ")?;
            }
            write!(writer, "{}", plan.style(self.styles.plan))?;
        }
        writeln!(writer)?;

        for test in tests {
            write!(writer, "{}: ", test.style(self.styles.test_name))?;
            match resolver.resolve_with_source(test) {
                Some(resolved) => writeln!(
                    writer,
                    "{} [{}/{}{}{}] (plan {}, rule {}: `{}`)",
                    resolved.policy.id.style(self.styles.policy),
                    resolved.policy.at_least,
                    resolved.policy.out_of,
                    if resolved.policy.fail_fast { ", fail-fast" } else { "" },
                    if resolved.policy.pass_fast { ", pass-fast" } else { "" },
                    resolved.plan.style(self.styles.plan),
                    resolved.rule_index,
                    resolved.pattern,
                )?,
                None => writeln!(writer, "{}", "not covered".style(self.styles.skip))?,
            }
        }
        Ok(())
    }

    // ---
    // Helper methods
    // ---

    fn write_event(&self, event: SessionEvent<'_>, writer: &mut dyn Write) -> io::Result<()> {
        match event {
            SessionEvent::SessionStarted {
                plan,
                covered,
                invocation_count,
            } => {
                self.write_plan_line(plan, covered, writer)?;
                writeln!(
                    writer,
                    "{:>12} {} {}",
                    "Starting".style(self.styles.pass),
                    invocation_count.style(self.styles.count),
                    plural::invocations_str(invocation_count),
                )?;
            }
            SessionEvent::GroupEntered { group, policy } => {
                writeln!(
                    writer,
                    "{} {} [{}]",
                    STOCHASTIC_SET.style(self.styles.group),
                    group,
                    format!("{}: {}/{}", policy.id, policy.at_least, policy.out_of)
                        .style(self.styles.group),
                )?;
            }
            SessionEvent::InvocationFinished {
                name,
                status,
                output,
            } => {
                let style = match status {
                    InvocationStatus::Pass => self.styles.pass,
                    InvocationStatus::Fail => self.styles.fail,
                };
                write!(writer, "{:>12} ", status.style(style))?;
                write!(writer, "[{}] ", format_duration(output.time_taken))?;
                self.write_name(name, writer)?;
                writeln!(writer)?;

                if !status.is_success() || !self.hide_success_output {
                    self.write_output(name, "STDOUT", &output.stdout, status, writer)?;
                    self.write_output(name, "STDERR", &output.stderr, status, writer)?;
                }
            }
            SessionEvent::InvocationSkipped { name, .. } => {
                write!(writer, "{:>12} ", "SKIP".style(self.styles.skip))?;
                // Same spacing as [   0.034s].
                write!(writer, "[         ] ")?;
                self.write_name(name, writer)?;
                writeln!(writer)?;
            }
            SessionEvent::GroupDecided { verdict, .. } => {
                let (outcome, style) = if verdict.passed {
                    ("PASSED", self.styles.pass)
                } else {
                    ("FAILED", self.styles.fail)
                };
                write!(
                    writer,
                    "{} {} [",
                    STOCHASTIC_SET.style(self.styles.group),
                    outcome.style(style),
                )?;
                let mut comment = format!("{} passed out of {}", verdict.passes, verdict.out_of);
                if !verdict.passed {
                    let missing = verdict.missing();
                    swrite!(comment, ", missing {missing} {}", plural::passes_str(missing));
                }
                writeln!(writer, "{}]", comment.style(self.styles.group))?;
            }
            SessionEvent::SessionAborted { name, error } => {
                write!(writer, "{:>12} ", "Aborting".style(self.styles.fail))?;
                write!(writer, "after ")?;
                self.write_name(name, writer)?;
                writeln!(writer, ": {}", DisplayErrorChain::new(error))?;
            }
            SessionEvent::SessionFinished {
                elapsed,
                run_stats,
                rectification,
                pending,
            } => {
                let summary_style = if rectification.is_success() {
                    self.styles.pass
                } else {
                    self.styles.fail
                };
                write!(writer, "{:>12} ", "Summary".style(summary_style))?;
                write!(writer, "[{}] ", format_duration(elapsed))?;
                self.write_stats(&run_stats, writer)?;
                writeln!(writer)?;

                for group in pending {
                    writeln!(
                        writer,
                        "{:>12} {} (counted as failed)",
                        "PENDING".style(self.styles.fail),
                        group
                    )?;
                }

                match rectification {
                    Rectification::Inert { .. } => {}
                    Rectification::Overridden => {
                        writeln!(writer, "{}", SUCCESS_BANNER.style(self.styles.pass))?;
                    }
                    other if !other.is_success() => {
                        writeln!(writer, "{}", FAILURE_BANNER.style(self.styles.fail))?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn write_plan_line(
        &self,
        plan: Option<&PlanId>,
        covered: usize,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let plan_style = if covered == 0 {
            self.styles.fail
        } else {
            self.styles.pass
        };
        let plan = plan.map_or("<none>", PlanId::as_str);
        writeln!(
            writer,
            "stochastics plan: {} [stochastic tests={}]",
            plan.style(plan_style),
            covered,
        )
    }

    fn write_stats(&self, run_stats: &RunStats, writer: &mut dyn Write) -> io::Result<()> {
        let count = self.styles.count;
        write!(writer, "{}", run_stats.final_run_count.style(count))?;
        if run_stats.final_run_count != run_stats.initial_run_count {
            write!(writer, "/{}", run_stats.initial_run_count.style(count))?;
        }
        write!(
            writer,
            " {} run: ",
            plural::invocations_str(run_stats.initial_run_count)
        )?;
        write!(
            writer,
            "{} {}, ",
            run_stats.passed.style(count),
            "passed".style(self.styles.pass)
        )?;
        if run_stats.failed > 0 {
            write!(
                writer,
                "{} {}, ",
                run_stats.failed.style(count),
                "failed".style(self.styles.fail)
            )?;
        }
        write!(
            writer,
            "{} {}",
            run_stats.skipped.style(count),
            "skipped".style(self.styles.skip)
        )?;

        let groups = run_stats.groups_passed + run_stats.groups_failed;
        if groups > 0 {
            write!(
                writer,
                "; {} stochastic {}: {} {}",
                groups.style(count),
                plural::groups_str(groups),
                run_stats.groups_passed.style(count),
                "passed".style(self.styles.pass),
            )?;
            if run_stats.groups_failed > 0 {
                write!(
                    writer,
                    ", {} {}",
                    run_stats.groups_failed.style(count),
                    "failed".style(self.styles.fail)
                )?;
            }
        }
        if run_stats.native_failed > 0 {
            write!(
                writer,
                "; {} native {} failed",
                run_stats.native_failed.style(count),
                plural::tests_str(run_stats.native_failed),
            )?;
        }
        Ok(())
    }

    fn write_name(&self, name: &InvocationName, writer: &mut dyn Write) -> io::Result<()> {
        // Highlight the part of the test after the last ::, if any.
        let group = name.group();
        match group.rsplit_once("::") {
            Some((rest, trailing)) => {
                write!(writer, "{}::{}", rest, trailing.style(self.styles.test_name))?
            }
            None => write!(writer, "{}", group.style(self.styles.test_name))?,
        }
        if let Some(repeat) = name.repeat_tag() {
            write!(writer, "{}", repeat.style(self.styles.repeat))?;
        }
        Ok(())
    }

    fn write_output(
        &self,
        name: &InvocationName,
        label: &str,
        output: &[u8],
        status: InvocationStatus,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let (header_style, output_style) = match status {
            InvocationStatus::Pass => (self.styles.pass, self.styles.pass_output),
            InvocationStatus::Fail => (self.styles.fail, self.styles.fail_output),
        };
        writeln!(
            writer,
            "\n{}",
            format!("--- {label}: {name} ---").style(header_style)
        )?;
        let output = String::from_utf8_lossy(output);
        write!(writer, "{}", output.style(output_style))?;
        if !output.is_empty() && !output.ends_with('\n') {
            writeln!(writer)?;
        }
        Ok(())
    }
}

impl Default for StochasticReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    pass_output: Style,
    fail_output: Style,
    skip: Style,
    group: Style,
    repeat: Style,
    plan: Style,
    policy: Style,
    test_name: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.pass_output = Style::new().green();
        self.fail_output = Style::new().magenta();
        self.skip = Style::new().yellow().bold();
        self.group = Style::new().bright_blue();
        self.repeat = Style::new().dimmed();
        self.plan = Style::new().cyan().bold();
        self.policy = Style::new().bright_blue().bold();
        self.test_name = Style::new().blue().bold();
    }
}
