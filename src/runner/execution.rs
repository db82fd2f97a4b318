use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::emit::{ReportFormat, ReportOutput, write_reports};
use crate::error::{ConfigError, RunError};
use crate::plan::browser::{
    BrowserDefinition, DEFAULT_BROWSERS, define_browsers, select_browser_names,
};
use crate::plan::environment::{resolve_environments, validate_environments};
use crate::plan::execution_list::build_execution_list;
use crate::plan::filter::{filter_tests, parse_filters};
use crate::plan::selection::expand_suite_tests;
use crate::plan::test_id::TestId;
use crate::project::Project;
use crate::project::settings::Settings;
use crate::report::directory::{
    ExecutionTarget, allocate_report_directories, create_execution_directory, new_timestamp,
};
use crate::report::execution::{ExecutionParams, ExecutionReport, generate_execution_report};
use crate::runner::definition::TestLoader;
use crate::runner::dispatch::{CancelToken, FailureFlag, dispatch};
use crate::runner::display::format_run_header;
use crate::runner::driver::{DriverFactory, NoDriver, WebDriverFactory};
use crate::runner::script::ScriptLoader;
use crate::runner::script::process::{HOOK_TIMEOUT, run_script};
use crate::runner::unit::UnitRunner;

/// Suite name of a run over the whole test tree.
pub const ALL_TESTS_SUITE: &str = "all";

/// Caller-supplied parameters of a run. Empty lists defer to the suite,
/// then to project settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub browsers: Vec<String>,
    pub environments: Vec<String>,
    pub processes: Option<usize>,
    pub tags: Vec<String>,
    pub report_formats: Vec<ReportFormat>,
    pub report_folder: Option<PathBuf>,
    pub report_name: Option<String>,
    /// Reuse an execution id chosen by the caller.
    pub timestamp: Option<String>,
}

/// Resolved parameters of one top-level run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub project: String,
    pub is_suite: bool,
    pub name: String,
    pub timestamp: String,
    pub worker_count: usize,
    pub browsers: Vec<BrowserDefinition>,
    pub environments: Vec<String>,
    pub tags: Vec<String>,
    pub report_formats: Vec<ReportFormat>,
}

/// Result of a finished (or interrupted) run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_dir: PathBuf,
    pub timestamp: String,
    pub report: ExecutionReport,
    /// Any unit failed, a worker crashed, or the run was interrupted.
    pub failed: bool,
}

/// Suite-level shell hooks run outside the per-unit lifecycle.
#[derive(Debug, Default)]
struct SuiteHooks {
    before: Option<String>,
    after: Option<String>,
}

/// Entry point tying resolution, dispatch and aggregation together for
/// single tests, suites and directories.
pub struct ExecutionRunner {
    project: Project,
    settings: Arc<Settings>,
    loader: Arc<dyn TestLoader>,
    driver_factory: Arc<dyn DriverFactory>,
    cancel: CancelToken,
    hook_timeout: Duration,
}

impl ExecutionRunner {
    /// Runner over the project's script tests, driving browsers through
    /// `remote_url` when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the project settings cannot be loaded.
    pub fn new(project: Project) -> Result<Self, ConfigError> {
        let settings = project.settings()?;
        let loader = ScriptLoader::new(project.tests_dir(), project.pages_dir());
        let driver_factory: Arc<dyn DriverFactory> = match &settings.remote_url {
            Some(url) if !url.is_empty() => Arc::new(WebDriverFactory::new(url.clone())),
            _ => Arc::new(NoDriver),
        };
        Ok(Self {
            project,
            settings: Arc::new(settings),
            loader: Arc::new(loader),
            driver_factory,
            cancel: CancelToken::new(),
            hook_timeout: HOOK_TIMEOUT,
        })
    }

    pub fn with_loader(mut self, loader: Arc<dyn TestLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.driver_factory = factory;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Limit for the suite `before` and `after` commands.
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run whatever `target` names: a suite, else a test, else a
    /// directory of the test tree.
    ///
    /// # Errors
    ///
    /// See [`run_test`](Self::run_test).
    pub fn run(&self, target: &str, options: &RunOptions) -> Result<ExecutionOutcome, RunError> {
        if let Ok(id) = target.parse::<TestId>() {
            if self.project.suite_exists(&id) {
                return self.run_suite(target, options);
            }
            if self.loader.exists(&id) {
                return self.run_test(target, options);
            }
        }
        self.run_directory(target, options)
    }

    /// Run one test. Tag filters and `skip` declarations do not apply.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for configuration errors, before any unit
    /// runs, or when the execution directory or report cannot be written.
    pub fn run_test(&self, test: &str, options: &RunOptions) -> Result<ExecutionOutcome, RunError> {
        let id: TestId = test.parse()?;
        if !self.loader.exists(&id) {
            return Err(ConfigError::UnknownTest(test.to_owned()).into());
        }
        let context = self.context(id.to_string(), false, &[], &[], None, options)?;
        self.execute(&context, vec![id], &SuiteHooks::default(), options)
    }

    /// Run a suite from `suites/<name>.yaml`.
    ///
    /// # Errors
    ///
    /// See [`run_test`](Self::run_test).
    pub fn run_suite(&self, suite: &str, options: &RunOptions) -> Result<ExecutionOutcome, RunError> {
        let id: TestId = suite.parse()?;
        let definition = self.project.suite(&id)?;
        let name = id.to_string();

        let mut tests = expand_suite_tests(self.loader.as_ref(), &name, &definition.tests)?;
        let tags = if options.tags.is_empty() {
            definition.tags.clone()
        } else {
            options.tags.clone()
        };
        if let Some(predicate) = parse_filters(&tags)? {
            tests = filter_tests(self.loader.as_ref(), tests, &predicate);
        }

        let mut context = self.context(
            name,
            true,
            &definition.browsers,
            &definition.environments,
            definition.processes,
            options,
        )?;
        context.tags = tags;
        let hooks = SuiteHooks {
            before: definition.before,
            after: definition.after,
        };
        self.execute(&context, tests, &hooks, options)
    }

    /// Run every test under a directory of the test tree. `.` is the
    /// whole tree and runs as suite [`ALL_TESTS_SUITE`].
    ///
    /// # Errors
    ///
    /// See [`run_test`](Self::run_test).
    pub fn run_directory(&self, dir: &str, options: &RunOptions) -> Result<ExecutionOutcome, RunError> {
        let trimmed = dir.trim().trim_matches('/');
        let prefix = if trimmed.is_empty() || trimmed == "." {
            None
        } else {
            Some(TestId::from_segments(trimmed.split(['/', '.']))?)
        };

        let mut tests = self.loader.discover(prefix.as_ref());
        if let Some(prefix) = &prefix
            && tests.is_empty()
            && !self.project.test_directory(trimmed).is_dir()
        {
            return Err(ConfigError::UnknownDirectory(prefix.to_string()).into());
        }
        if let Some(predicate) = parse_filters(&options.tags)? {
            tests = filter_tests(self.loader.as_ref(), tests, &predicate);
        }

        let name = prefix
            .as_ref()
            .map_or_else(|| ALL_TESTS_SUITE.to_owned(), ToString::to_string);
        let mut context = self.context(name, true, &[], &[], None, options)?;
        context.tags = options.tags.clone();
        self.execute(&context, tests, &SuiteHooks::default(), options)
    }

    /// Resolve browsers and environments. All configuration errors
    /// surface here, before anything touches the disk.
    fn context(
        &self,
        name: String,
        is_suite: bool,
        suite_browsers: &[String],
        suite_envs: &[String],
        suite_processes: Option<usize>,
        options: &RunOptions,
    ) -> Result<ExecutionContext, ConfigError> {
        let selected = select_browser_names(
            &options.browsers,
            suite_browsers,
            self.settings.default_browser.as_deref(),
        );
        let browsers = define_browsers(&selected, &self.settings.remote_browsers, DEFAULT_BROWSERS)?;

        let project_envs = self.project.environments()?;
        let environments = resolve_environments(&options.environments, suite_envs, &project_envs);
        validate_environments(&environments, &project_envs, &self.project.name)?;

        Ok(ExecutionContext {
            project: self.project.name.clone(),
            is_suite,
            name,
            timestamp: options.timestamp.clone().unwrap_or_else(new_timestamp),
            worker_count: options.processes.or(suite_processes).unwrap_or(1).max(1),
            browsers,
            environments,
            tags: Vec::new(),
            report_formats: options.report_formats.clone(),
        })
    }

    /// Run a suite's `before`/`after` command in the project root.
    /// Failures are logged only; a hook killed by interrupt or timeout
    /// does not hold back the report.
    fn run_suite_hook(&self, phase: &str, command: &str) {
        info!("running suite {phase} hook");
        let cancel = &self.cancel;
        match run_script(
            "/bin/sh",
            command,
            &self.project.root,
            self.hook_timeout,
            || cancel.is_cancelled(),
        ) {
            Ok(output) if output.interrupted => warn!("suite {phase} hook killed: execution interrupted"),
            Ok(output) if output.timed_out => warn!(
                timeout_secs = self.hook_timeout.as_secs_f64(),
                "suite {phase} hook exceeded its timeout"
            ),
            Ok(output) if output.exit_code == 0 => {}
            Ok(output) => warn!(
                status = output.exit_code,
                stderr = %output.stderr.trim_end(),
                "suite {phase} hook failed"
            ),
            Err(e) => warn!(error = %e, "suite {phase} hook could not start"),
        }
    }

    fn execute(
        &self,
        context: &ExecutionContext,
        tests: Vec<TestId>,
        hooks: &SuiteHooks,
        options: &RunOptions,
    ) -> Result<ExecutionOutcome, RunError> {
        let project_envs = self.project.environments()?;
        let secrets = self.project.secrets()?;
        let mut units = build_execution_list(
            self.loader.as_ref(),
            &tests,
            &context.browsers,
            &context.environments,
            &project_envs,
            &secrets,
        );

        let target = if context.is_suite {
            ExecutionTarget::Suite(&context.name)
        } else {
            ExecutionTarget::Test(&tests[0])
        };
        let reports_dir = self.project.reports_dir();
        let execution_dir = create_execution_directory(&reports_dir, &context.timestamp, target)
            .map_err(|source| RunError::ExecutionDirectory {
                path: reports_dir.clone(),
                source,
            })?;
        allocate_report_directories(&execution_dir, &mut units, context.is_suite);

        info!(
            "{}",
            format_run_header(&context.name, units.len(), context.worker_count)
        );
        debug!(dir = %execution_dir.display(), "execution directory");

        let runner = UnitRunner {
            loader: Arc::clone(&self.loader),
            settings: Arc::clone(&self.settings),
            driver_factory: Arc::clone(&self.driver_factory),
            is_suite: context.is_suite,
            failed: FailureFlag::new(),
            cancel: self.cancel.clone(),
        };

        let start = Instant::now();
        if let Some(cmd) = &hooks.before {
            self.run_suite_hook("before", cmd);
        }
        let summary = dispatch(&runner, &units, context.worker_count);
        if let Some(cmd) = &hooks.after {
            self.run_suite_hook("after", cmd);
        }
        if summary.not_started > 0 {
            warn!(count = summary.not_started, "units not started");
        }

        let params = ExecutionParams {
            browsers: context
                .browsers
                .iter()
                .map(|b| b.display_name().to_owned())
                .collect(),
            processes: context.worker_count,
            environments: context.environments.clone(),
            tags: context.tags.clone(),
            remote_url: self.settings.remote_url.clone().unwrap_or_default(),
        };
        let report = generate_execution_report(
            &execution_dir,
            target,
            start.elapsed().as_secs_f64(),
            params,
            self.cancel.is_cancelled(),
        )?;

        let output = ReportOutput {
            formats: &context.report_formats,
            folder: options.report_folder.as_deref(),
            name: options.report_name.as_deref(),
        };
        if let Err(e) = write_reports(
            &report,
            &execution_dir,
            &context.name,
            &context.timestamp,
            &output,
        ) {
            warn!(error = %e, "could not write report files");
        }

        Ok(ExecutionOutcome {
            execution_dir,
            timestamp: context.timestamp.clone(),
            report,
            failed: runner.failed.is_set(),
        })
    }
}
