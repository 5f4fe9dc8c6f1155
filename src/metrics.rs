//! Client-side metrics for blobfs.
//!
//! Counters are emitted through the `metrics` facade.  The library never
//! installs a recorder; applications that want the numbers install one
//! (Prometheus, statsd, ...) and call [`describe_metrics`] once.

use metrics::{counter, describe_counter};

// -- Metric name constants ----------------------------------------------------

/// Requests sent to the blob service (counter). Labels: method, status.
pub const REQUESTS_TOTAL: &str = "blobfs_requests_total";

/// Requests that failed before a response arrived (counter). Labels: method.
pub const TRANSPORT_FAILURES_TOTAL: &str = "blobfs_transport_failures_total";

/// Shadow copies created before an overwrite (counter).
pub const VERSIONS_CREATED_TOTAL: &str = "blobfs_versions_created_total";

/// Shadow copies that failed; the overwrite went ahead anyway (counter).
pub const VERSION_COPY_FAILURES_TOTAL: &str = "blobfs_version_copy_failures_total";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Requests sent to the blob service");
    describe_counter!(
        TRANSPORT_FAILURES_TOTAL,
        "Requests that failed without a service response"
    );
    describe_counter!(
        VERSIONS_CREATED_TOTAL,
        "Shadow versions created before an overwrite"
    );
    describe_counter!(
        VERSION_COPY_FAILURES_TOTAL,
        "Shadow version copies that failed during a write"
    );
}

/// Record one completed request.
pub fn record_request(method: &str, status: u16) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one request that produced no response.
pub fn record_transport_failure(method: &str) {
    counter!(TRANSPORT_FAILURES_TOTAL, "method" => method.to_string()).increment(1);
}

/// Record the outcome of a pre-overwrite shadow copy.
pub fn record_version_copy(succeeded: bool) {
    if succeeded {
        counter!(VERSIONS_CREATED_TOTAL).increment(1);
    } else {
        counter!(VERSION_COPY_FAILURES_TOTAL).increment(1);
    }
}
