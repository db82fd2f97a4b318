use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::error::HookError;
use crate::plan::execution_list::ExecutionUnit;
use crate::project::settings::Settings;
use crate::report::directory::format_timestamp;
use crate::runner::context::UnitContext;
use crate::runner::definition::{Hook, TestDefinition, TestLoader};
use crate::runner::dispatch::{CancelToken, FailureFlag};
use crate::runner::display::format_unit_result;
use crate::runner::driver::DriverFactory;
use crate::runner::result::{ResultStatus, TestResult, stringify_data};

/// Lifecycle of a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Importing,
    Setup,
    RunningTest,
    Teardown,
    /// Import failed or the test is skipped: nothing runs, nothing to tear down.
    AbortedBeforeRun,
    Finalized,
}

/// How a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// `report.json` was produced with this result.
    Finished(ResultStatus),
    /// The run was interrupted; no result was written.
    Interrupted,
}

/// Runs units through import → setup → test functions → teardown → finalize.
#[derive(Clone)]
pub struct UnitRunner {
    pub loader: Arc<dyn TestLoader>,
    pub settings: Arc<Settings>,
    pub driver_factory: Arc<dyn DriverFactory>,
    /// Part of a suite or directory run; enables the `skip` declaration.
    pub is_suite: bool,
    pub failed: FailureFlag,
    pub cancel: CancelToken,
}

/// State threaded through the phases of one unit.
struct UnitRun {
    ctx: UnitContext,
    definition: Option<TestDefinition>,
    pending: Option<ResultStatus>,
    started: Instant,
    timestamp: String,
}

impl UnitRun {
    /// Record a hook failure; the result is only set when none is pending.
    fn fail(&mut self, phase: &str, err: &HookError) {
        let (status, description) = match err {
            HookError::Assertion(message) => (ResultStatus::Failure, message.clone()),
            HookError::Code { description, .. } => (ResultStatus::CodeError, description.clone()),
        };
        self.ctx.log.error(&format!("{phase} failed: {err}"));
        self.ctx.error(err.to_string(), description);
        if self.pending.is_none() {
            self.pending = Some(status);
        }
    }
}

impl UnitRunner {
    /// Execute one unit and write its `report.json`.
    pub fn run(&self, unit: &ExecutionUnit) -> UnitOutcome {
        let ctx = UnitContext::new(
            unit,
            Arc::clone(&self.settings),
            Arc::clone(&self.driver_factory),
            self.cancel.clone(),
        );
        let mut run = UnitRun {
            ctx,
            definition: None,
            pending: None,
            started: Instant::now(),
            timestamp: format_timestamp(chrono::Local::now()),
        };

        run.ctx.log.info(&format!("Test execution started: {}", unit.test_name));
        run.ctx
            .log
            .info(&format!("Browser: {}", unit.browser.display_name()));
        if !run.ctx.env_name().is_empty() {
            let env = run.ctx.env_name().to_owned();
            run.ctx.log.info(&format!("Environment: {env}"));
        }
        if !unit.data_set.is_empty() {
            run.ctx.log.debug(&format!("Using data: {}", Value::Object(unit.data_set.clone())));
        }

        let mut phase = Phase::Importing;
        loop {
            phase = match phase {
                Phase::Importing => self.import(&mut run),
                Phase::Setup => self.setup(&mut run),
                Phase::RunningTest => self.run_tests(&mut run),
                Phase::Teardown => self.teardown(&mut run),
                Phase::AbortedBeforeRun => Phase::Finalized,
                Phase::Finalized => break,
            };
            if self.cancel.is_cancelled()
                && matches!(phase, Phase::Setup | Phase::RunningTest | Phase::Teardown)
            {
                run.ctx.close_driver();
                run.ctx.log.warn("execution interrupted");
                return UnitOutcome::Interrupted;
            }
        }

        UnitOutcome::Finished(self.finalize(run))
    }

    fn import(&self, run: &mut UnitRun) -> Phase {
        match self.loader.load(&run.ctx.test_name) {
            Err(err) => {
                run.ctx.log.error(&format!("import failed: {err}"));
                run.ctx.error(err.message, err.description);
                run.pending = Some(ResultStatus::CodeError);
                Phase::AbortedBeforeRun
            }
            Ok(definition) => {
                let skip = definition.skip.clone();
                run.definition = Some(definition);
                match skip {
                    Some(reason) if self.is_suite => {
                        let suffix = if reason.is_empty() {
                            String::new()
                        } else {
                            format!(": {reason}")
                        };
                        run.ctx.log.info(&format!("Skip{suffix}"));
                        run.pending = Some(ResultStatus::Skipped);
                        Phase::AbortedBeforeRun
                    }
                    _ => Phase::Setup,
                }
            }
        }
    }

    fn setup(&self, run: &mut UnitRun) -> Phase {
        let Some(hook) = run.definition.as_ref().and_then(|d| d.setup.clone()) else {
            return Phase::RunningTest;
        };
        run.ctx.log.debug("setup started");
        match invoke(&hook, &mut run.ctx) {
            Ok(()) => Phase::RunningTest,
            Err(err) => {
                run.fail("setup", &err);
                Phase::Teardown
            }
        }
    }

    fn run_tests(&self, run: &mut UnitRun) -> Phase {
        let tests = run
            .definition
            .as_ref()
            .map(|d| d.tests.clone())
            .unwrap_or_default();
        for test in &tests {
            if self.cancel.is_cancelled() {
                break;
            }
            run.ctx.log.info(&format!("Run test function: {}", test.name));
            if let Err(err) = invoke(test, &mut run.ctx) {
                run.fail(&test.name, &err);
                break;
            }
        }
        Phase::Teardown
    }

    fn teardown(&self, run: &mut UnitRun) -> Phase {
        if let Some(hook) = run.definition.as_ref().and_then(|d| d.teardown.clone()) {
            run.ctx.log.debug("teardown started");
            if let Err(err) = invoke(&hook, &mut run.ctx) {
                run.fail("teardown", &err);
            }
        }
        run.ctx.close_driver();
        Phase::Finalized
    }

    fn finalize(&self, mut run: UnitRun) -> ResultStatus {
        let elapsed = (run.started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
        let (steps, errors) = run.ctx.take_records();
        let result = match run.pending {
            Some(status) => status,
            None if !errors.is_empty() => ResultStatus::Error,
            None => ResultStatus::Success,
        };

        let set_name = run
            .ctx
            .data
            .get("set_name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                run.ctx
                    .report_dir
                    .as_deref()
                    .and_then(|dir| dir.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_default();

        let report = TestResult {
            test_case: run.ctx.test_name.to_string(),
            result,
            steps,
            errors,
            description: run
                .definition
                .as_ref()
                .map(|d| d.description.clone())
                .unwrap_or_default(),
            browser: run.ctx.browser.display_name().to_owned(),
            test_data: stringify_data(&run.ctx.data),
            environment: run.ctx.env_name().to_owned(),
            set_name,
            test_elapsed_time: elapsed,
            test_timestamp: run.timestamp,
        };

        match run.ctx.report_dir.as_deref() {
            Some(dir) => {
                if let Err(e) = report.write(dir) {
                    warn!(test = %report.test_case, error = %e, "could not write test report");
                }
            }
            None => warn!(test = %report.test_case, "no report directory; result not persisted"),
        }

        if result.is_failure() {
            self.failed.mark();
        }
        run.ctx.log.info(&format_unit_result(&report));
        result
    }
}

/// Call a hook, turning panics into hook errors: a panic whose message
/// starts with "assertion" is an assertion failure, anything else a code
/// error.
fn invoke(hook: &Hook, ctx: &mut UnitContext) -> Result<(), HookError> {
    match catch_unwind(AssertUnwindSafe(|| (hook.body)(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            if message.starts_with("assertion") {
                Err(HookError::Assertion(message))
            } else {
                Err(HookError::Code {
                    message: format!("panic in {}: {message}", hook.name),
                    description: message,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use crate::error::ImportError;
    use crate::plan::browser::BrowserDefinition;
    use crate::plan::test_id::TestId;
    use crate::project::settings::Dict;
    use crate::runner::driver::NoDriver;
    use crate::runner::registry::RegistryLoader;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn tracer(trace: &Trace, mark: &'static str) -> impl Fn() + Send + Sync + 'static {
        let trace = Arc::clone(trace);
        move || trace.lock().unwrap().push(mark)
    }

    fn unit(name: &str, dir: &Path) -> ExecutionUnit {
        ExecutionUnit {
            test_name: name.parse().unwrap(),
            data_set: Dict::new(),
            secrets: Arc::new(Dict::new()),
            browser: BrowserDefinition {
                name: "chrome".into(),
                full_name: None,
                remote: false,
                capabilities: Dict::new(),
            },
            report_dir: Some(dir.to_path_buf()),
        }
    }

    fn runner(loader: RegistryLoader, is_suite: bool) -> UnitRunner {
        UnitRunner {
            loader: Arc::new(loader),
            settings: Arc::new(Settings::default()),
            driver_factory: Arc::new(NoDriver),
            is_suite,
            failed: FailureFlag::new(),
            cancel: CancelToken::new(),
        }
    }

    fn run_one(def: TestDefinition, is_suite: bool) -> (UnitRunner, UnitOutcome, TestResult) {
        let dir = tempfile::tempdir().unwrap();
        let name = def.id.to_string();
        let mut loader = RegistryLoader::new();
        loader.register(def);
        let runner = runner(loader, is_suite);
        let outcome = runner.run(&unit(&name, dir.path()));
        let report = TestResult::read(dir.path()).unwrap();
        (runner, outcome, report)
    }

    fn id(s: &str) -> TestId {
        s.parse().unwrap()
    }

    #[test]
    fn empty_test_succeeds() {
        let (runner, outcome, report) =
            run_one(TestDefinition::new(id("t")).with_test("test", |_| Ok(())), true);
        assert_eq!(outcome, UnitOutcome::Finished(ResultStatus::Success));
        assert_eq!(report.result, ResultStatus::Success);
        assert!(report.errors.is_empty());
        assert!(!runner.failed.is_set());
    }

    #[test]
    fn phases_run_in_order() {
        let trace: Trace = Arc::default();
        let (s, t, d) = (
            tracer(&trace, "setup"),
            tracer(&trace, "test"),
            tracer(&trace, "teardown"),
        );
        let def = TestDefinition::new(id("t"))
            .with_setup(move |_| {
                s();
                Ok(())
            })
            .with_test("test", move |_| {
                t();
                Ok(())
            })
            .with_teardown(move |_| {
                d();
                Ok(())
            });
        run_one(def, true);
        assert_eq!(*trace.lock().unwrap(), vec!["setup", "test", "teardown"]);
    }

    #[test]
    fn setup_assertion_skips_body_but_runs_teardown() {
        let trace: Trace = Arc::default();
        let (t, d) = (tracer(&trace, "test"), tracer(&trace, "teardown"));
        let def = TestDefinition::new(id("t"))
            .with_setup(|_| Err(HookError::assertion("precondition")))
            .with_test("test", move |_| {
                t();
                Ok(())
            })
            .with_teardown(move |_| {
                d();
                Ok(())
            });
        let (runner, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::Failure);
        assert_eq!(*trace.lock().unwrap(), vec!["teardown"]);
        assert!(runner.failed.is_set());
    }

    #[test]
    fn setup_exception_is_code_error() {
        let def = TestDefinition::new(id("t"))
            .with_setup(|_| Err(HookError::code("db down")))
            .with_test("test", |_| Ok(()));
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::CodeError);
        assert_eq!(report.errors[0].message, "db down");
    }

    #[test]
    fn import_failure_skips_everything() {
        struct Broken;
        impl TestLoader for Broken {
            fn exists(&self, _id: &TestId) -> bool {
                true
            }
            fn discover(&self, _prefix: Option<&TestId>) -> Vec<TestId> {
                vec![]
            }
            fn load(&self, _id: &TestId) -> Result<TestDefinition, ImportError> {
                Err(ImportError::new("syntax error in t", "line 3"))
            }
            fn external_data(&self, _id: &TestId) -> Option<PathBuf> {
                None
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(RegistryLoader::new(), true);
        runner.loader = Arc::new(Broken);
        let outcome = runner.run(&unit("t", dir.path()));
        assert_eq!(outcome, UnitOutcome::Finished(ResultStatus::CodeError));
        let report = TestResult::read(dir.path()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].description, "line 3");
    }

    #[test]
    fn skip_only_honoured_in_suites() {
        let trace: Trace = Arc::default();
        let t = tracer(&trace, "test");
        let def = TestDefinition::new(id("t"))
            .with_skip("flaky")
            .with_test("test", move |_| {
                t();
                Ok(())
            });
        let (runner, _, report) = run_one(def.clone(), true);
        assert_eq!(report.result, ResultStatus::Skipped);
        assert!(trace.lock().unwrap().is_empty());
        assert!(!runner.failed.is_set());

        let (_, _, report) = run_one(def, false);
        assert_eq!(report.result, ResultStatus::Success);
        assert_eq!(*trace.lock().unwrap(), vec!["test"]);
    }

    #[test]
    fn body_assertion_is_failure_and_stops_later_functions() {
        let trace: Trace = Arc::default();
        let t = tracer(&trace, "second");
        let def = TestDefinition::new(id("t"))
            .with_test("first", |_| Err(HookError::assertion("wrong title")))
            .with_test("second", move |_| {
                t();
                Ok(())
            });
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::Failure);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn panics_are_classified() {
        let def = TestDefinition::new(id("t")).with_test("test", |_| {
            assert_eq!(1, 2, "numbers differ");
            Ok(())
        });
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::Failure);

        let def = TestDefinition::new(id("t")).with_test("test", |_| {
            let items: Vec<u8> = Vec::new();
            let _ = items.get(3).copied().ok_or("missing").map_err(HookError::code)?;
            Ok(())
        });
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::CodeError);

        let def = TestDefinition::new(id("t")).with_test("test", |_| panic!("index out of range"));
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::CodeError);
    }

    #[test]
    fn teardown_does_not_downgrade_failure() {
        let def = TestDefinition::new(id("t"))
            .with_test("test", |_| Err(HookError::assertion("bad")))
            .with_teardown(|_| Err(HookError::code("cleanup exploded")));
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::Failure);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn teardown_exception_after_success_is_code_error() {
        let def = TestDefinition::new(id("t"))
            .with_test("test", |_| Ok(()))
            .with_teardown(|_| Err(HookError::code("cleanup exploded")));
        let (_, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::CodeError);
    }

    #[test]
    fn non_fatal_errors_downgrade_to_error() {
        let def = TestDefinition::new(id("t")).with_test("test", |ctx| {
            ctx.step("looked at page");
            ctx.error("banner missing", "expected #banner");
            Ok(())
        });
        let (runner, _, report) = run_one(def, true);
        assert_eq!(report.result, ResultStatus::Error);
        assert_eq!(report.steps.len(), 1);
        assert!(runner.failed.is_set());
    }

    #[test]
    fn report_carries_unit_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = RegistryLoader::new();
        loader.register(
            TestDefinition::new(id("auth.login"))
                .with_description("logs in")
                .with_test("test", |_| Ok(())),
        );
        let runner = runner(loader, true);
        let set_dir = dir.path().join("set_abc");
        std::fs::create_dir(&set_dir).unwrap();
        let mut unit = unit("auth.login", &set_dir);
        unit.data_set.insert("user".into(), Value::from("alice"));
        runner.run(&unit);

        let report = TestResult::read(&set_dir).unwrap();
        assert_eq!(report.test_case, "auth.login");
        assert_eq!(report.description, "logs in");
        assert_eq!(report.browser, "chrome");
        assert_eq!(report.set_name, "set_abc");
        assert_eq!(report.test_data["user"], "alice");
        assert!(set_dir.join("execution_info.log").is_file());
    }

    #[test]
    fn explicit_set_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = RegistryLoader::new();
        loader.register(TestDefinition::new(id("t")));
        let runner = runner(loader, true);
        let mut unit = unit("t", dir.path());
        unit.data_set.insert("set_name".into(), Value::from("admin user"));
        runner.run(&unit);
        assert_eq!(TestResult::read(dir.path()).unwrap().set_name, "admin user");
    }

    #[test]
    fn cancellation_inside_body_leaves_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = RegistryLoader::new();
        loader.register(TestDefinition::new(id("t")).with_test("test", |ctx| {
            ctx.cancel_token().cancel();
            Ok(())
        }));
        let runner = runner(loader, true);
        let outcome = runner.run(&unit("t", dir.path()));
        assert_eq!(outcome, UnitOutcome::Interrupted);
        assert!(TestResult::read(dir.path()).is_err());
        assert!(dir.path().join("execution_info.log").is_file());
    }
}
