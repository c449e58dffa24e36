//! Publisher metrics.

use metrics::counter;

pub fn record_token_refresh(outcome: &'static str) {
    counter!("tubeflow_token_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_upload_bytes(bytes: u64) {
    counter!("tubeflow_upload_bytes_total").increment(bytes);
}

pub fn record_upload(outcome: &'static str) {
    counter!("tubeflow_uploads_total", "outcome" => outcome).increment(1);
}
