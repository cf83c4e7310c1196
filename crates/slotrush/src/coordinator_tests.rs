// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use parking_lot::Mutex;

use super::*;
use crate::test_support::ManualClock;

fn coordinator(clock: &Arc<ManualClock>) -> Coordinator {
    Coordinator::new(Arc::clone(clock) as Arc<dyn Clock>)
}

#[tokio::test]
async fn wait_until_50ms_ahead_lands_within_resolution() {
    let clock = ManualClock::new();
    let target = clock.now() + TimeDelta::milliseconds(50);

    coordinator(&clock).wait_until(target).await;

    let now = clock.now();
    assert!(now >= target, "returned {} before target", target - now);
    assert!(now <= target + TimeDelta::milliseconds(5), "overshoot {}", now - target);
}

#[tokio::test]
async fn wait_until_past_target_returns_immediately() {
    let clock = ManualClock::new();
    let start = clock.now();

    coordinator(&clock).wait_until(start - TimeDelta::seconds(3)).await;

    assert!(clock.sleeps().is_empty());
    assert_eq!(clock.now(), start);
}

#[tokio::test]
async fn long_wait_uses_coarse_then_fine_steps() {
    let clock = ManualClock::new();
    let target = clock.now() + TimeDelta::milliseconds(95_250);

    coordinator(&clock).wait_until(target).await;

    let sleeps = clock.sleeps();
    assert!(sleeps.iter().all(|d| *d <= Duration::from_secs(1)), "sleep longer than coarse step");
    // 85.25 s of coarse sleeping in <= 1 s steps, then sub-second steps.
    assert!(sleeps.len() >= 86 + 99, "only {} sleeps", sleeps.len());
    let now = clock.now();
    assert!(now >= target);
    assert!(now <= target + TimeDelta::milliseconds(5));
}

#[tokio::test]
async fn final_stretch_is_spun_not_slept() {
    let clock = ManualClock::new();
    let target = clock.now() + TimeDelta::milliseconds(8);

    coordinator(&clock).wait_until(target).await;

    assert!(clock.sleeps().is_empty(), "sleeps within spin window: {:?}", clock.sleeps());
    assert!(clock.now() >= target);
}

#[tokio::test]
async fn prepare_fires_hooks_in_offset_order() -> anyhow::Result<()> {
    let clock = ManualClock::new();
    let target = clock.now() + TimeDelta::seconds(20);
    let fired: Arc<Mutex<Vec<(String, chrono::DateTime<chrono::Utc>)>>> = Arc::default();

    let hooks = ["final-check:5", "login:15"]
        .into_iter()
        .map(|entry| {
            let (name, secs) = entry.split_once(':').unwrap_or((entry, "0"));
            let secs: u64 = secs.parse().unwrap_or_default();
            let fired = Arc::clone(&fired);
            let clock = Arc::clone(&clock);
            let name = name.to_owned();
            PrepHook::new(name.clone(), Duration::from_secs(secs), move || async move {
                fired.lock().push((name, clock.now()));
                Ok(())
            })
        })
        .collect();

    coordinator(&clock).prepare(target, hooks).await?;

    let fired = fired.lock().clone();
    assert_eq!(fired.len(), 2);
    assert_eq!(fired[0].0, "login");
    assert_eq!(fired[1].0, "final-check");
    assert!(fired[0].1 >= target - TimeDelta::seconds(15));
    assert!(fired[1].1 >= target - TimeDelta::seconds(5));
    assert!(fired[1].1 < target);
    Ok(())
}

#[tokio::test]
async fn prepare_propagates_hook_failure_and_skips_rest() {
    let clock = ManualClock::new();
    let target = clock.now();
    let later_ran = Arc::new(Mutex::new(false));

    let flag = Arc::clone(&later_ran);
    let hooks = vec![
        PrepHook::new("login", Duration::from_secs(15), || async {
            Err(anyhow::anyhow!("backend unavailable"))
        }),
        PrepHook::new("final-check", Duration::from_secs(5), move || async move {
            *flag.lock() = true;
            Ok(())
        }),
    ];

    let result = coordinator(&clock).prepare(target, hooks).await;

    let err = result.err().map(|e| format!("{e:#}")).unwrap_or_default();
    assert!(err.contains("preparation hook login failed"), "{err}");
    assert!(err.contains("backend unavailable"), "{err}");
    assert!(!*later_ran.lock());
}
