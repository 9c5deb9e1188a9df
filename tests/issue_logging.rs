use trigflow::{Issue, IssueLog, JsonLineLogger, LogLevel, LogRotationPolicy};

#[test]
fn issues_become_json_log_lines() {
    let issues = IssueLog::new();
    issues.record(
        "mlt",
        Issue::TriggerInhibited { run_number: 4 },
    );
    issues.record("mlt", Issue::TriggerActive);

    let records = issues.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].component, "mlt");

    let lines = issues.log_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"level\":\"WARN\""));
    assert!(lines[0].contains("trigger is inhibited in run 4"));
    assert!(lines[1].contains("\"level\":\"INFO\""));
}

#[test]
fn level_filter_suppresses_quiet_records() {
    let mut logger = JsonLineLogger::default();
    logger.set_level(LogLevel::Error);
    let issues = IssueLog::with_logger(logger);

    issues.record("slicer", Issue::WindowlessOutput);
    assert_eq!(issues.snapshot().len(), 1, "record is kept for diagnostics");
    assert!(issues.log_lines().is_empty(), "warning is below the filter");
}

#[test]
fn rotation_caps_retained_segments() {
    let mut logger = JsonLineLogger::new(LogRotationPolicy {
        max_bytes: 120,
        max_segments: 2,
    });
    for index in 0..50 {
        logger
            .log(LogLevel::Info, "merger", &format!("line {index}"))
            .unwrap();
    }
    assert!(logger.segments().count() <= 3, "history plus the active segment");
    let total_lines: usize = logger.segments().map(|segment| segment.lines().len()).sum();
    assert!(total_lines < 50, "old segments were dropped");
}
