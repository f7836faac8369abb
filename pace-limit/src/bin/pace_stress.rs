use std::error::Error;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use hdrhistogram::Histogram;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pace_limit::Limiter;
use pace_limit::PacerBuilder;
use pace_limit::Unlimited;

/// Hammer a shared pacer from many threads and report how well it paced.
#[derive(Debug, Parser)]
struct Args {
    /// Calls allowed per interval
    #[arg(long, default_value_t = 1_000, allow_negative_numbers = true)]
    rate: i64,

    /// Interval the rate applies to, e.g. "1s" or "250ms"
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    per: Duration,

    /// Floor on negative debt, in request budgets
    #[arg(long, default_value_t = 10)]
    slack: usize,

    /// Disable bursting
    #[arg(long)]
    no_slack: bool,

    /// Worker threads
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Calls per worker thread
    #[arg(long, default_value_t = 250)]
    calls: usize,

    /// Run against the no-op limiter instead, as a baseline
    #[arg(long)]
    unlimited: bool,
}

fn run_load_test<L>(
    name: &str,
    limiter: Arc<L>,
    threads: usize,
    calls: usize,
) -> Result<Histogram<u64>, Box<dyn Error>>
where
    L: Limiter + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let bar = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut waits = Vec::with_capacity(calls);
                bar.wait();
                for _ in 0..calls {
                    let start = Instant::now();
                    limiter.take();
                    waits.push(start.elapsed());
                }
                waits
            })
        })
        .collect();

    // Values are microseconds; an hour is plenty of headroom.
    let mut hist = Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)?;

    for handle in handles {
        match handle.join() {
            Ok(waits) => {
                for wait in waits {
                    hist.record((wait.as_micros() as u64).max(1))?;
                }
            }
            Err(_) => warn!(limiter = name, "worker panicked"),
        }
    }
    Ok(hist)
}

/// Every call after the first moves the shared deadline by at least one budget.
fn minimum_duration(per_request: Duration, calls: usize) -> Duration {
    u32::try_from(calls.saturating_sub(1))
        .ok()
        .and_then(|n| per_request.checked_mul(n))
        .unwrap_or(Duration::MAX)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let total = args.threads * args.calls;

    let mut builder = PacerBuilder::try_new(args.rate)?
        .per(args.per)
        .slack(args.slack);
    if args.no_slack {
        builder = builder.without_slack();
    }
    let pacer = builder.build();
    let expected = minimum_duration(pacer.per_request(), total);

    info!(?args, "starting stress run");

    let start = Instant::now();
    let (name, hist) = if args.unlimited {
        let name = "Unlimited";
        (name, run_load_test(name, Arc::new(Unlimited::new()), args.threads, args.calls)?)
    } else {
        let name = "Pacer";
        (name, run_load_test(name, Arc::new(pacer), args.threads, args.calls)?)
    };
    let total_duration = start.elapsed();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Minimum Expected: {:.2?}", expected);
    println!("Calls:           {}", total);
    println!(
        "Achieved Rate:   {:.2} calls/sec",
        total as f64 / total_duration.as_secs_f64()
    );
    println!("P50 (Wait):      {}µs", hist.value_at_quantile(0.5));
    println!("P99 (Wait):      {}µs", hist.value_at_quantile(0.99));
    println!("Max (Wait):      {}µs", hist.max());
    println!();

    Ok(())
}
