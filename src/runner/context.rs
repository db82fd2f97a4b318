use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::DriverError;
use crate::logging::UnitLog;
use crate::plan::browser::BrowserDefinition;
use crate::plan::environment::environment_name;
use crate::plan::execution_list::ExecutionUnit;
use crate::plan::test_id::TestId;
use crate::project::settings::{Dict, Settings};
use crate::runner::dispatch::CancelToken;
use crate::runner::driver::{DriverFactory, DriverSession};
use crate::runner::result::{ErrorRecord, StepRecord};

/// Mutable execution state of one unit, handed to every hook and test
/// function by reference. One instance per unit, never shared.
pub struct UnitContext {
    pub test_name: TestId,
    pub data: Dict,
    pub secrets: Arc<Dict>,
    pub settings: Arc<Settings>,
    pub browser: BrowserDefinition,
    pub report_dir: Option<PathBuf>,
    pub log: UnitLog,
    steps: Vec<StepRecord>,
    errors: Vec<ErrorRecord>,
    driver: Option<Box<dyn DriverSession>>,
    driver_factory: Arc<dyn DriverFactory>,
    cancel: CancelToken,
}

impl UnitContext {
    pub fn new(
        unit: &ExecutionUnit,
        settings: Arc<Settings>,
        driver_factory: Arc<dyn DriverFactory>,
        cancel: CancelToken,
    ) -> Self {
        let log = UnitLog::open(unit.test_name.to_string(), unit.report_dir.as_deref());
        Self {
            test_name: unit.test_name.clone(),
            data: unit.data_set.clone(),
            secrets: Arc::clone(&unit.secrets),
            settings,
            browser: unit.browser.clone(),
            report_dir: unit.report_dir.clone(),
            log,
            steps: Vec::new(),
            errors: Vec::new(),
            driver: None,
            driver_factory,
            cancel,
        }
    }

    /// Record a step.
    pub fn step(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.log.info(&format!("STEP: {message}"));
        self.steps.push(StepRecord {
            message,
            screenshot: None,
        });
    }

    /// Attach a screenshot (path relative to the report dir) to the last
    /// step, or to a new step when none has been logged.
    pub fn screenshot(&mut self, file: impl Into<String>) {
        let file = file.into();
        self.log.debug(&format!("screenshot saved: {file}"));
        match self.steps.last_mut() {
            Some(step) if step.screenshot.is_none() => step.screenshot = Some(file),
            _ => self.steps.push(StepRecord {
                message: "screenshot".into(),
                screenshot: Some(file),
            }),
        }
    }

    /// Record a non-fatal error. The test keeps running, but a unit
    /// that would otherwise succeed finishes as ERROR.
    pub fn error(&mut self, message: impl Into<String>, description: impl Into<String>) {
        let message = message.into();
        self.log.error(&message);
        self.errors.push(ErrorRecord {
            message,
            description: description.into(),
        });
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub(crate) fn take_records(&mut self) -> (Vec<StepRecord>, Vec<ErrorRecord>) {
        (std::mem::take(&mut self.steps), std::mem::take(&mut self.errors))
    }

    /// Name of the environment this unit runs against, blank if none.
    pub fn env_name(&self) -> &str {
        environment_name(&self.data)
    }

    pub fn report_dir(&self) -> Option<&Path> {
        self.report_dir.as_deref()
    }

    /// The unit's driver session, opened on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the session cannot be opened.
    pub fn driver(&mut self) -> Result<&mut dyn DriverSession, DriverError> {
        if self.driver.is_none() {
            let session = self.driver_factory.open(&self.browser)?;
            self.log
                .debug(&format!("driver session {} opened", session.session_id()));
            self.driver = Some(session);
        }
        match self.driver.as_deref_mut() {
            Some(driver) => Ok(driver),
            None => Err(DriverError::Unavailable(self.browser.display_name().to_owned())),
        }
    }

    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }

    /// Quit the driver session if one is open. Failures are logged.
    pub fn close_driver(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            match driver.quit() {
                Ok(()) => self.log.debug("driver session closed"),
                Err(e) => self.log.warn(&format!("failed to close driver session: {e}")),
            }
        }
    }

    /// Whether the run has been interrupted.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}
