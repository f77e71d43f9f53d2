//! Prometheus text exposition for `GET /metrics`
//!
//! Engine counters come from the lock-free `Metrics` totals, so scraping
//! never disturbs the periodic log. Per-station gauges come from the live
//! business date's productivity snapshot.

use crate::infra::metrics::{Metrics, MetricsTotals, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::aggregator::ProductivitySnapshot;
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
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
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
    sum: u64,
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

    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(
    metrics: &Metrics,
    live: Option<&ProductivitySnapshot>,
    site_id: &str,
) -> String {
    let totals = metrics.totals();
    let mut output = String::with_capacity(4096);

    write_engine_metrics(&mut output, site_id, &totals);
    write_histogram(
        &mut output,
        "expedicao_commit_latency_us",
        "Registration commit latency in microseconds",
        site_id,
        &totals.commit_latency_buckets,
        totals.commit_latency_sum_us,
    );
    if let Some(snapshot) = live {
        write_station_metrics(&mut output, site_id, snapshot);
    }

    output
}

fn write_engine_metrics(output: &mut String, site: &str, totals: &MetricsTotals) {
    let counters = [
        ("expedicao_registrations_total", "Registrations committed", totals.registrations_total),
        ("expedicao_duplicates_total", "Duplicate scans rejected", totals.duplicates_total),
        ("expedicao_invalid_barcodes_total", "Barcodes rejected by the classifier", totals.invalid_barcodes_total),
        ("expedicao_invalid_stations_total", "Station inputs outside M1..M4", totals.invalid_stations_total),
        ("expedicao_storage_errors_total", "Registration log write failures", totals.storage_errors_total),
        ("expedicao_day_closures_total", "Business days closed", totals.day_closures_total),
        ("expedicao_live_events_dropped_total", "Live events lost by lagging subscribers", totals.live_events_dropped),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, site, val);
    }

    write_metric(
        output,
        "expedicao_commit_latency_p99_us",
        "99th percentile commit latency since startup",
        MetricType::Gauge,
        site,
        totals.commit_latency_p99_us,
    );
}

fn write_station_metrics(output: &mut String, site: &str, snapshot: &ProductivitySnapshot) {
    let date = snapshot.business_date;

    write_metric(
        output,
        "expedicao_day_packages",
        "Packages registered on the live business date",
        MetricType::Gauge,
        site,
        snapshot.total_packages,
    );

    let _ = writeln!(output, "# HELP expedicao_station_packages Packages per station on the live business date");
    let _ = writeln!(output, "# TYPE expedicao_station_packages gauge");
    for (station, count) in &snapshot.total_by_station {
        let _ = writeln!(
            output,
            "expedicao_station_packages{{site=\"{site}\",station=\"{station}\",date=\"{date}\"}} {count}"
        );
    }

    if let Some(ref pace) = snapshot.pace_by_station {
        let _ = writeln!(output, "# HELP expedicao_station_pace Packages/hour over the trailing window");
        let _ = writeln!(output, "# TYPE expedicao_station_pace gauge");
        for (station, rate) in pace {
            let _ = writeln!(output, "expedicao_station_pace{{site=\"{site}\",station=\"{station}\"}} {rate:.2}");
        }
    }
}
