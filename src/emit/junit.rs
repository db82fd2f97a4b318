use std::fmt::Write;

use crate::report::execution::ExecutionReport;
use crate::runner::result::ResultStatus;

/// Render an execution report as JUnit XML.
///
/// Suite-level counts come from `totals_by_result` so they always agree
/// with the JSON report. Units that never produced a result (pending,
/// stopped, not run) count as errors.
pub fn generate_junit_report(report: &ExecutionReport, suite_name: &str, timestamp: &str) -> String {
    let mut out = String::new();
    let name = xml_escape(suite_name);
    let tests = report.total_tests;
    let failures = report.count(ResultStatus::Failure) + report.count(ResultStatus::Error);
    let errors = report.count(ResultStatus::CodeError)
        + report
            .totals_by_result
            .iter()
            .filter(|(status, _)| status.is_abnormal())
            .map(|(_, n)| n)
            .sum::<usize>();
    let skipped = report.count(ResultStatus::Skipped);
    let time = report.net_elapsed_time;
    let timestamp = xml_escape(timestamp);

    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).unwrap();
    writeln!(
        out,
        r#"<testsuites errors="{errors}" failures="{failures}" name="{name}" tests="{tests}" time="{time}">"#
    )
    .unwrap();
    writeln!(
        out,
        r#"  <testsuite errors="{errors}" failures="{failures}" name="{name}" skipped="{skipped}" tests="{tests}" time="{time}" timestamp="{timestamp}">"#
    )
    .unwrap();

    for test in &report.tests {
        let classname = xml_escape(&test.full_name);
        let case = xml_escape(&test.set_name);
        let elapsed = test.elapsed_time;
        let tag = match test.result {
            ResultStatus::Success => None,
            ResultStatus::Failure | ResultStatus::Error => Some("failure"),
            ResultStatus::Skipped => Some("skipped"),
            _ => Some("error"),
        };
        match tag {
            None => {
                writeln!(
                    out,
                    r#"    <testcase classname="{classname}" name="{case}" time="{elapsed}"/>"#
                )
                .unwrap();
            }
            Some(tag) => {
                writeln!(
                    out,
                    r#"    <testcase classname="{classname}" name="{case}" time="{elapsed}">"#
                )
                .unwrap();
                let result = test.result.as_str();
                writeln!(out, r#"      <{tag} type="{result}" message="{result}"/>"#).unwrap();
                writeln!(out, "    </testcase>").unwrap();
            }
        }
    }

    writeln!(out, "  </testsuite>").unwrap();
    writeln!(out, "</testsuites>").unwrap();

    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
