//! Human-readable run report on stdout.

use std::time::Duration;

use bytesize::ByteSize;
use rangebench_engine::{
    HostReport, LatencySketchSummary, LatencySummary, StopReason, TerminalSummary, WindowStats,
};
use yansi::Paint;

/// Prints the summary of a run.
pub fn print_summary(summary: &TerminalSummary) {
    println!();
    println!(
        "{} {} ({})",
        "## Benchmark".bold(),
        summary.backend.bold().blue(),
        summary.endpoint
    );
    println!("  elapsed: {}", humantime::format_duration(round(summary.elapsed)));
    if summary.cancelled {
        println!("  {}", "CANCELLED".bold().yellow());
    }

    if let Some(warmup) = &summary.warmup {
        println!();
        println!("{}", "WARMUP:".bold().green());
        print_window(warmup);
    }

    if !summary.ramp.is_empty() {
        println!();
        println!("{} ({} steps)", "RAMP:".bold().green(), summary.ramp.len().bold());
        for step in &summary.ramp {
            print_step(step, summary.selected_concurrency());
        }
    }

    if let Some(decision) = summary.plateau {
        println!();
        println!(
            "{} concurrency {} ({})",
            "PLATEAU:".bold().green(),
            decision.concurrency.bold(),
            describe(decision.reason)
        );
    }

    if let Some(steady) = &summary.steady_state {
        println!();
        println!("{}", "STEADY STATE:".bold().green());
        print_window(steady);
    }

    if let Some(interrupted) = &summary.interrupted {
        println!();
        println!(
            "{} {} (truncated)",
            "INTERRUPTED:".bold().yellow(),
            interrupted.label
        );
        print_window(interrupted);
    }

    println!();
    println!("{}", "## TOTALS".bold());
    let totals = &summary.totals;
    print!(
        "  {} requests, {}",
        totals.requests.bold(),
        ByteSize::b(totals.bytes).bold()
    );
    let failures = totals.http_errors + totals.transport_errors + totals.timeouts;
    if failures > 0 {
        print!(
            ", {}",
            format!(
                "{failures} FAILURES ({} http, {} transport, {} timeout)",
                totals.http_errors, totals.transport_errors, totals.timeouts
            )
            .bold()
            .red()
        );
    }
    println!();
    if let Some(latency) = &totals.latency {
        print_sketch(latency);
    }

    if summary.dropped_outcomes > 0 {
        println!(
            "  {}",
            format!("{} outcomes dropped by a full result sink", summary.dropped_outcomes)
                .bold()
                .red()
        );
    }
    let persistence = &summary.persistence;
    if persistence.dropped > 0 || persistence.failures > 0 {
        println!(
            "  {}",
            format!(
                "persistence lost {} outcomes, {} write failures",
                persistence.dropped, persistence.failures
            )
            .bold()
            .red()
        );
    }
    if summary.forced_workers > 0 {
        println!(
            "  {}",
            format!("{} workers aborted after the drain grace", summary.forced_workers).yellow()
        );
    }

    if let Some(host) = &summary.host {
        println!();
        print_host(host);
    }
}

fn print_window(stats: &WindowStats) {
    print!(
        "  concurrency {}: {:.2} Gbit/s, {} requests",
        stats.concurrency.bold(),
        stats.throughput_gbps().bold(),
        stats.requests
    );
    if stats.errors > 0 {
        print!(
            ", {}",
            format!("{} ERRORS ({:.1}%)", stats.errors, stats.error_rate * 100.0)
                .bold()
                .red()
        );
    }
    println!();
    print_latency(&stats.latency);
}

fn print_step(step: &WindowStats, selected: Option<usize>) {
    let marker = if selected == Some(step.concurrency) {
        "*".bold().green().to_string()
    } else {
        " ".to_owned()
    };
    println!(
        " {marker} {:>6} {:>4}: {:>8.2} Gbit/s  p50: {:.2?}; p99: {:.2?}; errors: {}",
        step.label.to_string(),
        step.concurrency,
        step.throughput_gbps(),
        step.latency.p50,
        step.latency.p99,
        step.errors
    );
}

fn print_latency(latency: &LatencySummary) {
    println!(
        "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p95: {:.2?}; p99: {:.2?}",
        latency.avg.bold(),
        latency.p50,
        latency.p90,
        latency.p95,
        latency.p99
    );
}

fn print_sketch(latency: &LatencySketchSummary) {
    println!(
        "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
        latency.avg.bold(),
        latency.p50,
        latency.p90,
        latency.p99
    );
}

fn print_host(host: &HostReport) {
    print!(
        "{} ({} samples",
        "HOST:".bold().green(),
        host.samples.bold()
    );
    if host.degraded() {
        print!(", {}", format!("{} FAILED", host.failures).bold().yellow());
    }
    println!(")");
    println!(
        "  cpu avg: {:.1}%; peak: {:.1}%",
        host.avg_cpu_pct.bold(),
        host.peak_cpu_pct
    );
    print!(
        "  network in: {}; out: {}",
        ByteSize::b(host.network_bytes_in),
        ByteSize::b(host.network_bytes_out)
    );
    match host.tcp_retransmits {
        Some(retransmits) => println!("; tcp retransmits: {retransmits}"),
        None => println!(),
    }
}

fn describe(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Plateau => "throughput stopped growing",
        StopReason::Degradation => "throughput degraded",
        StopReason::MaxConcurrency => "maximum concurrency reached",
        StopReason::BandwidthCeiling => "host bandwidth ceiling reached",
        StopReason::ErrorRate => "error rate too high",
    }
}

fn round(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}
