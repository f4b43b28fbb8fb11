pub(crate) const METRIC_STATUS_TRANSITIONS: &str = "health_status_transitions_total";
pub(crate) const METRIC_CHECK_RUNS: &str = "health_check_runs_total";
pub(crate) const METRIC_SHUTDOWN_INITIATED: &str = "health_shutdown_initiated_total";
pub(crate) const METRIC_SHUTDOWN_PHASE_DURATION: &str = "health_shutdown_phase_duration_seconds";
pub(crate) const METRIC_SHUTDOWN_CALLBACK_RESULT: &str = "health_shutdown_callback_result_total";
pub(crate) const METRIC_SHUTDOWN_COMPLETED: &str = "health_shutdown_completed_total";

pub(crate) fn emit_status_transition(service_name: &str, status: &str) {
    metrics::counter!(
        METRIC_STATUS_TRANSITIONS,
        "service_name" => service_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_check_run(service_name: &str, check: &str, result: &str) {
    metrics::counter!(
        METRIC_CHECK_RUNS,
        "service_name" => service_name.to_string(),
        "check" => check.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_initiated(service_name: &str, reason: &str) {
    metrics::counter!(
        METRIC_SHUTDOWN_INITIATED,
        "service_name" => service_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_phase_duration(service_name: &str, duration_secs: f64) {
    metrics::histogram!(
        METRIC_SHUTDOWN_PHASE_DURATION,
        "service_name" => service_name.to_string()
    )
    .record(duration_secs);
}

pub(crate) fn emit_shutdown_callback_result(service_name: &str, result: &str) {
    metrics::counter!(
        METRIC_SHUTDOWN_CALLBACK_RESULT,
        "service_name" => service_name.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_completed(service_name: &str, clean: bool) {
    metrics::counter!(
        METRIC_SHUTDOWN_COMPLETED,
        "service_name" => service_name.to_string(),
        "clean" => clean.to_string()
    )
    .increment(1);
}
