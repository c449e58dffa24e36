//! Pipeline metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Record the outcome of one pipeline step.
pub fn record_step(step: &'static str, outcome: &'static str, elapsed: Duration) {
    counter!("tubeflow_pipeline_steps_total", "step" => step, "outcome" => outcome).increment(1);
    histogram!("tubeflow_pipeline_step_duration_seconds", "step" => step).record(elapsed.as_secs_f64());
}

pub fn record_reaped(count: u64) {
    counter!("tubeflow_cleanup_reaped_total").increment(count);
}

pub fn record_sweep_failures(count: u64) {
    counter!("tubeflow_cleanup_failures_total").increment(count);
}
