//! Prometheus text exposition for monitor metrics
//!
//! Rendered on demand by the HTTP API at /metrics. Scrapes use a
//! non-resetting snapshot so they do not disturb the periodic log summary.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_posture_metrics(&mut output, site_id, &summary);
    write_sensor_metrics(&mut output, site_id, &summary);
    write_sink_metrics(&mut output, site_id, &summary);

    output
}

fn write_posture_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "babysphere_frames_total",
        "Frames classified",
        MetricType::Counter,
        site,
        summary.frames_total,
    );
    write_metric(
        output,
        "babysphere_frames_no_subject_total",
        "Frames where no subject was detected",
        MetricType::Counter,
        site,
        summary.frames_no_subject,
    );
    write_metric(
        output,
        "babysphere_frames_rejected_total",
        "Frames rejected as undecodable",
        MetricType::Counter,
        site,
        summary.frames_rejected,
    );
    write_histogram(
        output,
        "babysphere_frame_latency_ms",
        "Frame extract and classify latency in milliseconds",
        site,
        &summary.lat_buckets,
        summary.avg_frame_latency_ms,
    );
    write_metric(
        output,
        "babysphere_posture",
        "Current posture (0=unknown, 1=safe, 2=side, 3=tummy)",
        MetricType::Gauge,
        site,
        summary.posture,
    );
    write_metric(
        output,
        "babysphere_notifications_total",
        "Posture notifications emitted",
        MetricType::Counter,
        site,
        summary.notifications_total,
    );
}

fn write_sensor_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "babysphere_sensor_readings_total",
        "Sensor readings accepted",
        MetricType::Counter,
        site,
        summary.readings_total,
    );
    write_metric(
        output,
        "babysphere_sensor_errors_total",
        "Failed sensor reads",
        MetricType::Counter,
        site,
        summary.producer_errors_total,
    );
    write_metric(
        output,
        "babysphere_records_flushed_total",
        "Complete sensor records committed",
        MetricType::Counter,
        site,
        summary.records_flushed_total,
    );
    write_metric(
        output,
        "babysphere_flush_incomplete_total",
        "Flush ticks with an incomplete record",
        MetricType::Counter,
        site,
        summary.flush_incomplete_total,
    );
}

fn write_sink_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "babysphere_sink_deliveries_total",
        "Successful sink deliveries",
        MetricType::Counter,
        site,
        summary.sink_deliveries_total,
    );
    write_metric(
        output,
        "babysphere_sink_failures_total",
        "Failed sink deliveries",
        MetricType::Counter,
        site,
        summary.sink_failures_total,
    );
    write_metric(
        output,
        "babysphere_relay_clients",
        "Connected websocket relay clients",
        MetricType::Gauge,
        site,
        summary.relay_clients,
    );
}
