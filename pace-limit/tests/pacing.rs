use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use more_asserts::assert_ge;
use more_asserts::assert_lt;

use pace_limit::Clock;
use pace_limit::Limiter;
use pace_limit::MockClock;
use pace_limit::Pacer;
use pace_limit::Unlimited;

fn rate(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

//
// With time frozen every successful take must stack exactly one budget on top of
// its predecessor. A lost update would show up as a repeated deadline or a gap.
//
#[test]
fn concurrent_takes_form_exact_progression() {
    let threads = 8;
    let calls = 250;

    let clock = MockClock::frozen();
    let pacer = Arc::new(
        Pacer::builder(rate(1_000))
            .clock(clock.clone())
            .build(),
    );
    let start = clock.now();
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pacer = Arc::clone(&pacer);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..calls).map(|_| pacer.take()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut offsets: Vec<Duration> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .map(|deadline| deadline.duration_since(start))
        .collect();
    offsets.sort();

    let per = pacer.per_request();
    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(*offset, per * i as u32, "deadline {i} out of place");
    }
    assert_eq!(clock.sleep_count(), (threads * calls - 1) as u64);
}

#[test]
fn each_thread_sees_non_decreasing_deadlines() {
    let clock = MockClock::new();
    let pacer = Arc::new(Pacer::builder(rate(500)).clock(clock).build());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pacer = Arc::clone(&pacer);
            thread::spawn(move || {
                let deadlines: Vec<_> = (0..200).map(|_| pacer.take()).collect();
                deadlines.windows(2).all(|w| w[0] <= w[1])
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn real_clock_enforces_minimum_duration() {
    let threads = 4;
    let calls = 25;
    let slack = 10;

    let pacer = Arc::new(Pacer::builder(rate(1_000)).slack(slack).build());
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pacer = Arc::clone(&pacer);
            thread::spawn(move || {
                for _ in 0..calls {
                    pacer.take();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let minimum = pacer.per_request() * (threads * calls - 1 - slack) as u32;
    assert_ge!(start.elapsed(), minimum);
}

#[test]
fn real_clock_waits_right_after_idle() {
    let pacer = Pacer::new(rate(100));
    pacer.take();
    thread::sleep(Duration::from_millis(150));

    let start = Instant::now();
    pacer.take();
    assert_lt!(start.elapsed(), Duration::from_millis(9));

    let start = Instant::now();
    pacer.take();
    assert_ge!(start.elapsed(), Duration::from_millis(9));
}

#[test]
fn first_take_returns_immediately() {
    let pacer = Pacer::builder(rate(1)).per(Duration::from_secs(3600)).build();

    let start = Instant::now();
    pacer.take();
    assert_lt!(start.elapsed(), Duration::from_secs(1));
}

#[test]
fn limiters_are_interchangeable() {
    let clock = MockClock::new();
    let limiters: Vec<Box<dyn Limiter + Send + Sync>> = vec![
        Box::new(Unlimited::with_clock(clock.clone())),
        Box::new(
            Pacer::builder(rate(10))
                .without_slack()
                .clock(clock.clone())
                .build(),
        ),
    ];

    for limiter in &limiters {
        for _ in 0..3 {
            limiter.take();
        }
    }

    // Only the pacer waited: twice, one budget each.
    assert_eq!(clock.sleep_count(), 2);
    assert_eq!(clock.total_slept(), Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_tasks_share_a_pacer() {
    let clock = MockClock::frozen();
    let pacer = Arc::new(Pacer::builder(rate(100)).clock(clock.clone()).build());
    let start = clock.now();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pacer = Arc::clone(&pacer);
            tokio::task::spawn_blocking(move || pacer.take())
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let latest = results
        .into_iter()
        .map(|r| r.unwrap().duration_since(start))
        .max()
        .unwrap();

    assert_eq!(latest, pacer.per_request() * 15);
    assert_eq!(clock.total_slept(), pacer.per_request() * (1..16).sum::<u32>());
}
