use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: IntCounter =
        register_int_counter!("relay_requests_total", "Total number of contact submissions")
            .expect("register relay_requests_total");
    pub static ref RESPONSES: IntCounterVec = register_int_counter_vec!(
        "relay_responses_total",
        "Contact submission outcomes by status code",
        &["status"]
    )
    .expect("register relay_responses_total");
    pub static ref NOTIFY_LATENCY: Histogram = register_histogram!(
        "relay_notify_latency_seconds",
        "Time spent delivering a message downstream"
    )
    .expect("register relay_notify_latency_seconds");
    pub static ref LIMITER_ENTRIES: IntGauge =
        register_int_gauge!("relay_rate_limiter_entries", "Tracked (client, route) pairs after the last sweep")
            .expect("register relay_rate_limiter_entries");
}

// Counts one finished submission
pub fn record_outcome(status: u16) {
    let status = status.to_string();
    RESPONSES.with_label_values(&[status.as_str()]).inc();
}
