use crate::plan::environment::environment_name;
use crate::plan::execution_list::ExecutionUnit;
use crate::report::execution::ExecutionReport;
use crate::runner::result::TestResult;

/// Progress line for a unit about to execute.
pub fn format_unit_start(unit: &ExecutionUnit, order: usize, total: usize) -> String {
    let env = environment_name(&unit.data_set);
    let browser = unit.browser.display_name();
    if env.is_empty() {
        format!("[{order}/{total}] {} ({browser}) ...", unit.test_name)
    } else {
        format!("[{order}/{total}] {} ({browser}, {env}) ...", unit.test_name)
    }
}

/// Final line of a unit's log.
pub fn format_unit_result(result: &TestResult) -> String {
    let mut line = format!("Test Result: {}", result.result.as_str().to_uppercase());
    if let Some(err) = result.errors.first() {
        line.push_str(&format!("\n         → {}", err.message));
    }
    line
}

/// Summary after all units complete, counts by result in result order.
pub fn format_summary(report: &ExecutionReport) -> String {
    let parts: Vec<String> = report
        .totals_by_result
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(status, n)| format!("{n} {status}"))
        .collect();
    let counts = if parts.is_empty() {
        "0 tests".to_owned()
    } else {
        parts.join(", ")
    };
    let mut line = format!("Result: {counts} ({:.1}s)", report.net_elapsed_time);
    if report.interrupted {
        line.push_str(" [interrupted]");
    }
    line
}

/// Header printed before dispatch.
pub fn format_run_header(name: &str, units: usize, processes: usize) -> String {
    let plural = if units == 1 { "" } else { "s" };
    if processes > 1 {
        format!("Running {name}: {units} unit{plural} on {processes} processes")
    } else {
        format!("Running {name}: {units} unit{plural}")
    }
}
