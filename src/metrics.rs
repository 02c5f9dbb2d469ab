use crate::buildinfo;
use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Prometheus' default histogram buckets, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Counters and histograms the webhook pipeline reports to.
///
/// Implementations are shared between concurrent requests and must be cheap
/// to call.
pub trait Telemetry: Send + Sync {
    /// A batch was decoded, before validation.
    fn batch_received(&self, status: &str);
    /// A batch was delivered to the chat endpoint.
    fn batch_sent(&self, status: &str);
    fn provider_error(&self, provider: &'static str);
    /// Total time spent on one webhook request, labelled by response code.
    fn request_processed(&self, status_code: u16, elapsed: Duration);
    /// Time spent on one outbound delivery. `outcome` is the response code
    /// or a short error kind.
    fn provider_request(&self, provider: &'static str, outcome: &str, elapsed: Duration);
}

/// Reports through the `metrics` facade, rendered by the Prometheus recorder
/// installed in [`setup_metrics`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PrometheusTelemetry;

impl Telemetry for PrometheusTelemetry {
    fn batch_received(&self, status: &str) {
        counter!("alertchat_batches_received_total", "status" => status.to_string()).increment(1);
    }

    fn batch_sent(&self, status: &str) {
        counter!("alertchat_batches_sent_total", "status" => status.to_string()).increment(1);
    }

    fn provider_error(&self, provider: &'static str) {
        counter!("alertchat_provider_errors_total", "provider" => provider).increment(1);
    }

    fn request_processed(&self, status_code: u16, elapsed: Duration) {
        histogram!("alertchat_processing_duration_seconds", "status" => status_code.to_string())
            .record(elapsed.as_secs_f64());
    }

    fn provider_request(&self, provider: &'static str, outcome: &str, elapsed: Duration) {
        histogram!(
            "alertchat_provider_request_duration_seconds",
            "provider" => provider,
            "status" => outcome.to_string()
        )
        .record(elapsed.as_secs_f64());
    }
}

pub fn setup_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .set_buckets(DURATION_BUCKETS)
                .expect("duration buckets are not empty")
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            describe_counter!(
                "alertchat_batches_received_total",
                Unit::Count,
                "Alert batches received, by batch status"
            );
            describe_counter!(
                "alertchat_batches_sent_total",
                Unit::Count,
                "Alert batches delivered to Google Chat"
            );
            describe_counter!(
                "alertchat_provider_errors_total",
                Unit::Count,
                "Failed deliveries, by provider"
            );
            describe_histogram!(
                "alertchat_processing_duration_seconds",
                Unit::Seconds,
                "Time spent processing webhook requests"
            );
            describe_histogram!(
                "alertchat_provider_request_duration_seconds",
                Unit::Seconds,
                "Time spent making requests to the chat provider"
            );
            describe_gauge!(
                "alertchat_start_time_seconds",
                Unit::Seconds,
                "Process start time since the Unix epoch"
            );
            describe_gauge!("alertchat_version_info", "Build version of the running binary");

            handle
        })
        .clone()
}

/// Sets the gauges describing the running process.
pub fn record_process_info() {
    let start_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    gauge!("alertchat_start_time_seconds").set(start_timestamp);
    gauge!("alertchat_version_info", "version" => buildinfo::version()).set(1.0);
}
