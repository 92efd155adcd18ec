// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::io::{BufWriter, Write};
use stochastic_runner::{
    config::{DefaultConfigWarnings, PlanId, StochasticConfig},
    errors::{DisplayErrorChain, WriteEventError},
    exit_codes::StochasticExitCode,
    git,
    list::{BinaryHost, TestBinary},
    reporter::StochasticReporter,
    runner::SessionRunner,
};
use supports_color::Stream;
use tracing::{error, info, warn};

/// Runs test binaries under stochastic pass/fail policies.
///
/// This binary should typically be invoked as `cargo stochastic` (in which case
/// this message will not be seen), not `cargo-stochastic`.
#[derive(Debug, Parser)]
#[command(version, bin_name = "cargo", styles = clap_styles::style())]
pub struct CargoStochasticApp {
    #[command(subcommand)]
    subcommand: StochasticSubcommand,
}

impl CargoStochasticApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        let StochasticSubcommand::Stochastic(app) = &self.subcommand;
        app.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let StochasticSubcommand::Stochastic(app) = self.subcommand;
        app.exec(output)
    }
}

#[derive(Debug, Subcommand)]
enum StochasticSubcommand {
    /// Runs test binaries under stochastic pass/fail policies.
    Stochastic(AppImpl),
}

#[derive(Debug, Args)]
#[command(version)]
struct AppImpl {
    /// Directory to look up the config file and git branch from [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: workspace-root/.config/stochastics.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Plan to use [default: current git branch, or `default`]
    #[arg(long, short = 'P', global = true, env = git::PLAN_ENV)]
    plan: Option<String>,
}

impl ConfigOpts {
    /// Reads the config. Returns `Ok(None)` if no file was requested and the
    /// default file doesn't exist.
    fn make_config(&self, workspace_root: &Utf8Path) -> Result<Option<StochasticConfig>> {
        let config = match &self.config_file {
            Some(config_file) => {
                StochasticConfig::from_file(config_file, &mut DefaultConfigWarnings).map(Some)
            }
            None => StochasticConfig::from_workspace_root(workspace_root, &mut DefaultConfigWarnings),
        };
        Ok(config?)
    }

    /// Reads the config, running natively if it is missing or invalid.
    fn make_config_or_inert(&self, workspace_root: &Utf8Path) -> Option<StochasticConfig> {
        match self.make_config(workspace_root) {
            Ok(Some(config)) => Some(config),
            Ok(None) => {
                info!(
                    "no config at {}, running tests natively",
                    workspace_root.join(StochasticConfig::CONFIG_PATH)
                );
                None
            }
            Err(ExpectedError::ConfigParseError { err }) => {
                error!(
                    "stochastic policies disabled for this run: {}",
                    DisplayErrorChain::new(&err)
                );
                None
            }
            Err(other) => {
                warn!("{other}");
                None
            }
        }
    }

    fn plan(&self, workspace_root: &Utf8Path) -> PlanId {
        git::select_plan(self.plan.as_deref(), workspace_root)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the invocations that would run
    ///
    /// Tests covered by a policy are listed once per repeat, tagged with the
    /// policy name and repeat index. Nothing is run.
    List {
        #[command(flatten)]
        binaries: BinaryOpts,
    },
    /// Run tests
    ///
    /// Each binary is listed with `--list --format terse`, and each invocation
    /// runs in its own process. The exit code accounts for stochastic groups
    /// that met their thresholds.
    Run {
        #[command(flatten)]
        binaries: BinaryOpts,

        /// Also print captured output for passing invocations
        #[arg(long)]
        success_output: bool,
    },
    /// Show the policy each test resolves to
    Show {
        /// Test identifiers, as `<binary>::<test name>`
        #[arg(required = true, value_name = "TEST")]
        tests: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct BinaryOpts {
    /// Test binaries to run
    #[arg(required = true, value_name = "BINARY")]
    binaries: Vec<Utf8PathBuf>,

    /// Working directory for the test binaries [default: current directory]
    #[arg(long, value_name = "DIR")]
    cwd: Option<Utf8PathBuf>,
}

impl BinaryOpts {
    fn host(&self) -> BinaryHost {
        BinaryHost::new(self.binaries.iter().map(|binary| TestBinary {
            binary: binary.clone(),
            friendly_name: None,
            cwd: self.cwd.clone(),
        }))
    }
}

impl AppImpl {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let workspace_root = match self.workspace_root {
            Some(root) => root,
            None => current_dir()?,
        };

        let mut reporter = StochasticReporter::new();
        if output.color.should_colorize(Stream::Stdout) {
            reporter.colorize();
        }
        let mut writer = BufWriter::new(std::io::stdout());

        match self.command {
            Command::List { binaries } => {
                let config = self.config_opts.make_config_or_inert(&workspace_root);
                let plan = self.config_opts.plan(&workspace_root);
                let mut runner = session_runner(config.as_ref(), plan);

                let invocations = runner.schedule(&mut binaries.host())?;
                reporter.write_schedule(
                    runner.plan(),
                    runner.covered_count(),
                    &invocations,
                    &mut writer,
                )?;
                writer.flush().map_err(WriteEventError::from)?;
                Ok(StochasticExitCode::OK)
            }
            Command::Run {
                binaries,
                success_output,
            } => {
                let config = self.config_opts.make_config_or_inert(&workspace_root);
                let plan = self.config_opts.plan(&workspace_root);
                let runner = session_runner(config.as_ref(), plan);
                reporter.set_show_success_output(success_output || output.verbose);

                let summary = runner
                    .try_execute(&mut binaries.host(), |event| {
                        reporter.report_event(event, &mut writer)
                    })?;

                if summary.is_success() {
                    Ok(StochasticExitCode::OK)
                } else {
                    Err(ExpectedError::TestRunFailed)
                }
            }
            Command::Show { tests } => {
                let config = match self.config_opts.make_config(&workspace_root)? {
                    Some(config) => config,
                    None => {
                        return Err(ExpectedError::ConfigNotFound {
                            config_file: workspace_root.join(StochasticConfig::CONFIG_PATH),
                        });
                    }
                };
                let plan = self.config_opts.plan(&workspace_root);
                if !plan.is_root() && !config.has_plan(plan.as_str()) {
                    warn!("plan `{plan}` is not defined in the config");
                }

                reporter.write_resolution(
                    &config.resolver(plan),
                    tests.iter().map(String::as_str),
                    &mut writer,
                )?;
                writer.flush().map_err(WriteEventError::from)?;
                Ok(StochasticExitCode::OK)
            }
        }
    }
}

fn session_runner(config: Option<&StochasticConfig>, plan: PlanId) -> SessionRunner<'_> {
    match config {
        Some(config) => SessionRunner::new(config.resolver(plan)),
        None => SessionRunner::inert(),
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirInvalid { err })?;
    Utf8PathBuf::from_path_buf(dir).map_err(|path| ExpectedError::CurrentDirNonUtf8 { path })
}
