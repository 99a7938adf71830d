//! `goflow bench`: Runtime micro-benchmarks.

use crate::output::StyledOutput;
use anyhow::{bail, Context};
use goflow_runtime::{
    parallel_map_on, Channel, FastChannel, Group, Mutex, Scheduler, SchedulerConfig,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use termcolor::ColorChoice;

/// A named workload; returns the number of operations it performed
struct Benchmark {
    name: &'static str,
    run: fn(&Scheduler) -> anyhow::Result<u64>,
}

static BENCHMARKS: &[Benchmark] = &[
    Benchmark {
        name: "spawn_join",
        run: spawn_join,
    },
    Benchmark {
        name: "channel_ping_pong",
        run: channel_ping_pong,
    },
    Benchmark {
        name: "fast_channel_throughput",
        run: fast_channel_throughput,
    },
    Benchmark {
        name: "group_fan_out",
        run: group_fan_out,
    },
    Benchmark {
        name: "parallel_map",
        run: parallel_map,
    },
    Benchmark {
        name: "mutex_contention",
        run: mutex_contention,
    },
];

#[derive(Debug, Serialize)]
struct BenchResult {
    name: &'static str,
    iterations: usize,
    ops_per_iteration: u64,
    mean_ms: f64,
    min_ms: f64,
    ops_per_sec: f64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    version: &'static str,
    workers: usize,
    results: Vec<BenchResult>,
}

pub fn execute(
    pattern: Option<String>,
    workers: usize,
    iterations: usize,
    json: bool,
    color: ColorChoice,
) -> anyhow::Result<()> {
    let selected = select(pattern.as_deref());
    if selected.is_empty() {
        bail!(
            "no benchmark matches '{}'",
            pattern.unwrap_or_default()
        );
    }

    let config = SchedulerConfig::new(workers).with_thread_prefix("goflow-bench");
    let scheduler = Scheduler::with_config(config).context("failed to start benchmark scheduler")?;
    let iterations = iterations.max(1);

    let mut results = Vec::with_capacity(selected.len());
    for bench in selected {
        log::info!("running {} ({} iterations)", bench.name, iterations);
        results.push(measure(bench, &scheduler, iterations)?);
    }

    let report = BenchReport {
        version: env!("CARGO_PKG_VERSION"),
        workers: scheduler.worker_count(),
        results,
    };
    scheduler.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report, color);
    }
    Ok(())
}

fn select(pattern: Option<&str>) -> Vec<&'static Benchmark> {
    BENCHMARKS
        .iter()
        .filter(|b| pattern.is_none_or(|p| b.name.contains(p)))
        .collect()
}

fn measure(bench: &Benchmark, scheduler: &Scheduler, iterations: usize) -> anyhow::Result<BenchResult> {
    // One untimed warmup run
    let ops = (bench.run)(scheduler).with_context(|| format!("benchmark {} failed", bench.name))?;

    let mut total = Duration::ZERO;
    let mut min = Duration::MAX;
    for _ in 0..iterations {
        let start = Instant::now();
        (bench.run)(scheduler)?;
        let elapsed = start.elapsed();
        total += elapsed;
        min = min.min(elapsed);
    }

    let mean = mean_duration(total, iterations);
    Ok(BenchResult {
        name: bench.name,
        iterations,
        ops_per_iteration: ops,
        mean_ms: mean.as_secs_f64() * 1e3,
        min_ms: min.as_secs_f64() * 1e3,
        ops_per_sec: ops as f64 / mean.as_secs_f64().max(f64::EPSILON),
    })
}

fn print_table(report: &BenchReport, color: ColorChoice) {
    let mut out = StyledOutput::new(color);
    out.bold(&format!(
        "goflow v{} benchmarks on {} workers",
        report.version, report.workers
    ));
    out.newline();
    out.newline();
    out.bold(&format!(
        "{:<26}{:>12}{:>12}{:>16}",
        "benchmark", "mean ms", "min ms", "ops/sec"
    ));
    out.newline();
    for result in &report.results {
        out.info(&format!("{:<26}", result.name));
        out.plain(&format!(
            "{:>12.3}{:>12.3}{:>16}",
            result.mean_ms,
            result.min_ms,
            format_rate(result.ops_per_sec)
        ));
        out.newline();
    }
    out.flush();
}

/// `total / iterations` without narrowing the divisor
fn mean_duration(total: Duration, iterations: usize) -> Duration {
    total.div_f64(iterations.max(1) as f64)
}

fn format_rate(ops_per_sec: f64) -> String {
    if ops_per_sec >= 1e6 {
        format!("{:.2}M", ops_per_sec / 1e6)
    } else if ops_per_sec >= 1e3 {
        format!("{:.1}K", ops_per_sec / 1e3)
    } else {
        format!("{:.0}", ops_per_sec)
    }
}

// ── Workloads ────────────────────────────────────────────────────────

fn spawn_join(scheduler: &Scheduler) -> anyhow::Result<u64> {
    const TASKS: u64 = 10_000;
    let futures: Vec<_> = (0..TASKS).map(|i| scheduler.spawn(move || i)).collect();
    for future in futures {
        future.join()?;
    }
    Ok(TASKS)
}

fn channel_ping_pong(scheduler: &Scheduler) -> anyhow::Result<u64> {
    const ROUNDS: u64 = 2_000;
    let ping = Channel::new(0);
    let pong = Channel::new(0);
    let (rx, tx) = (ping.clone(), pong.clone());
    let echo = scheduler.spawn(move || {
        for value in rx.iter() {
            if tx.send(value).is_err() {
                break;
            }
        }
    });

    for i in 0..ROUNDS {
        ping.send(i).map_err(|_| anyhow::anyhow!("ping channel closed"))?;
        pong.recv().context("pong channel closed")?;
    }
    ping.close()?;
    echo.join()?;
    Ok(ROUNDS * 2)
}

fn fast_channel_throughput(scheduler: &Scheduler) -> anyhow::Result<u64> {
    const MESSAGES: u64 = 100_000;
    let channel = FastChannel::bounded(1024);
    let tx = channel.clone();
    let producer = scheduler.spawn(move || {
        for i in 0..MESSAGES {
            if tx.send(i).is_err() {
                break;
            }
        }
        let _ = tx.close();
    });

    let received = channel.iter().count() as u64;
    producer.join()?;
    if received != MESSAGES {
        bail!("received {} of {} messages", received, MESSAGES);
    }
    Ok(MESSAGES)
}

fn group_fan_out(scheduler: &Scheduler) -> anyhow::Result<u64> {
    const TASKS: u64 = 10_000;
    let group = Group::with_scheduler(scheduler, Some(scheduler.worker_count() * 2));
    for i in 0..TASKS {
        let _ = group.go(move || i.wrapping_mul(2654435761));
    }
    group.wait();
    Ok(TASKS)
}

fn parallel_map(scheduler: &Scheduler) -> anyhow::Result<u64> {
    const ITEMS: u64 = 10_000;
    let out = parallel_map_on(scheduler, |x: u64| x.rotate_left(7) ^ x, 0..ITEMS)?;
    Ok(out.len() as u64)
}

fn mutex_contention(scheduler: &Scheduler) -> anyhow::Result<u64> {
    const PER_TASK: u64 = 10_000;
    let tasks = scheduler.worker_count() as u64;
    let counter = Arc::new(Mutex::new(0u64));
    let futures: Vec<_> = (0..tasks)
        .map(|_| {
            let counter = counter.clone();
            scheduler.spawn(move || {
                for _ in 0..PER_TASK {
                    *counter.acquire() += 1;
                }
            })
        })
        .collect();
    for future in futures {
        future.join()?;
    }
    let total = *counter.acquire();
    if total != tasks * PER_TASK {
        bail!("mutex lost updates: {} of {}", total, tasks * PER_TASK);
    }
    Ok(total)
}
