//! End-to-end engine scenarios
//!
//! All tests run on a paused Tokio clock, so multi-second leases finish instantly.
//!
//! Run with: cargo test -p leasekeep-engine --test engine_scenarios

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leasekeep_engine::prelude::*;
use serde_json::json;
use tokio::time::{sleep, Instant};

fn args(pairs: &[(&str, serde_json::Value)]) -> Arguments {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn add_work() -> Work {
    Work::new(|ctx: WorkContext| async move {
        let x: i64 = ctx.arg("x")?;
        let y: i64 = ctx.arg("y")?;
        sleep(Duration::from_secs(2)).await;
        Ok::<_, WorkError>(json!(x + y))
    })
}

fn sleeper_ms(ms: u64) -> Work {
    Work::new(move |_ctx| async move {
        sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    })
}

fn sleeper(secs: u64) -> Work {
    Work::new(move |_ctx| async move {
        sleep(Duration::from_secs(secs)).await;
        Ok(json!(secs))
    })
}

fn crash_config() -> EngineConfig {
    EngineConfig::default()
        .with_lease_duration(Duration::from_secs(3))
        .with_heartbeat_period(Duration::from_secs(1))
        .with_monitor_interval(Duration::from_secs(1))
}

// ============================================
// Submission and status
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_fresh_task_is_running_with_recent_heartbeat() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.submit(sleeper(30), "t1", Arguments::new()).unwrap();

    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Running);
    assert_eq!(view.attempt_id, "t1");

    let attempt = engine.attempt(&view.attempt_id).unwrap();
    assert!(attempt.since_heartbeat < engine.config().lease_duration);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_add_returns_result() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine
        .submit(add_work(), "req-1", args(&[("x", json!(2)), ("y", json!(3))]))
        .unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(engine.status("req-1").unwrap().status, TaskStatus::Running);

    sleep(Duration::from_secs(1)).await;
    let view = engine.status("req-1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, Some(json!(5)));
    assert_eq!(view.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_arguments_fail_task() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine
        .submit(add_work(), "req-1", args(&[("x", json!("two"))]))
        .unwrap();

    sleep(Duration::from_millis(100)).await;
    let view = engine.status("req-1").unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view.error.unwrap().contains("invalid argument x"));
}

#[tokio::test(start_paused = true)]
async fn test_tasks_are_isolated() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let panicking = Work::new(|ctx: WorkContext| async move {
        sleep(Duration::from_millis(500)).await;
        if ctx.task_id == "bad" {
            panic!("boom");
        }
        Ok(json!(null))
    });

    engine.submit(panicking, "bad", Arguments::new()).unwrap();
    engine
        .submit(add_work(), "good", args(&[("x", json!(1)), ("y", json!(1))]))
        .unwrap();

    sleep(Duration::from_secs(3)).await;
    let bad = engine.status("bad").unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(bad.error.as_deref(), Some("boom"));

    let good = engine.status("good").unwrap();
    assert_eq!(good.status, TaskStatus::Completed);
    assert_eq!(good.result, Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_work_can_report_status() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let reporter = Work::new(|ctx: WorkContext| async move {
        ctx.report(TaskStatus::Failed);
        Ok(json!("ignored"))
    });
    engine.submit(reporter, "t1", Arguments::new()).unwrap();

    sleep(Duration::from_millis(100)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.result, None);
}

#[tokio::test(start_paused = true)]
async fn test_completion_reported_by_work_keeps_value() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let work = Work::new(|ctx: WorkContext| async move {
        ctx.complete(json!(5));
        sleep(Duration::from_secs(30)).await;
        Ok(json!("late"))
    });
    engine.submit(work, "t1", Arguments::new()).unwrap();

    sleep(Duration::from_millis(100)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, Some(json!(5)));

    // reaping while the work is still running loses nothing the caller already saw
    assert_eq!(engine.scan_now().reaped, vec!["t1".to_string()]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_non_terminal_status_reports_are_ignored() {
    let engine = Engine::new(crash_config()).unwrap();
    let work = Work::new(|ctx: WorkContext| async move {
        assert!(!ctx.report(TaskStatus::Running));
        std::future::pending::<()>().await;
        Ok(json!(null))
    })
    .without_heartbeat();
    engine.submit(work, "t1", Arguments::new()).unwrap();

    assert!(!engine.set_status("t1", TaskStatus::Resubmitted));
    assert_eq!(engine.status("t1").unwrap().status, TaskStatus::Running);

    // the silent attempt is still found by the monitor
    sleep(Duration::from_millis(4500)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Running);
    assert_ne!(view.attempt_id, "t1");
    assert_eq!(view.attempts, 2);
}

#[tokio::test]
async fn test_blocking_work() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let blocking = Work::blocking(|ctx: WorkContext| {
        let n: u64 = ctx.arg("n")?;
        Ok((1..=n).product::<u64>().into())
    });
    engine
        .submit(blocking, "fact", args(&[("n", json!(5))]))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.status("fact").unwrap().status == TaskStatus::Running {
        assert!(Instant::now() < deadline, "blocking work never finished");
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.status("fact").unwrap().result, Some(json!(120)));
}

// ============================================
// Leases and resubmission
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_heartbeats_keep_long_work_alive() {
    let config = EngineConfig::default()
        .with_lease_duration(Duration::from_secs(10))
        .with_heartbeat_period(Duration::from_secs(2))
        .with_monitor_interval(Duration::from_secs(2));
    let engine = Engine::new(config).unwrap();
    engine.submit(sleeper(29), "t1", Arguments::new()).unwrap();

    for _ in 0..28 {
        sleep(Duration::from_secs(1)).await;
        let view = engine.status("t1").unwrap();
        assert_eq!(view.status, TaskStatus::Running);
        assert_eq!(view.attempt_id, "t1");
    }

    sleep(Duration::from_millis(1500)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.attempts, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_silent_attempt_is_resubmitted() {
    let engine = Engine::new(crash_config()).unwrap();
    engine
        .submit(sleeper(60).without_heartbeat(), "t1", Arguments::new())
        .unwrap();

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(engine.status("t1").unwrap().attempt_id, "t1");

    sleep(Duration::from_secs(2)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.id, "t1");
    assert_eq!(view.status, TaskStatus::Running);
    assert_ne!(view.attempt_id, "t1");
    assert!(view.attempt_id.starts_with("t1:"));
    assert_eq!(view.attempts, 2);

    let attempt = engine.attempt(&view.attempt_id).unwrap();
    assert_eq!(attempt.task_id, "t1");
    assert_eq!(attempt.number, 2);
    assert_eq!(attempt.info["reason"], "lease_expired");
    assert_eq!(attempt.info["previous_attempt"], "t1");
}

#[tokio::test(start_paused = true)]
async fn test_success_from_superseded_attempt_completes_task() {
    let engine = Engine::new(crash_config()).unwrap();
    let work = Work::new(|ctx: WorkContext| async move {
        if ctx.is_retry() {
            std::future::pending::<()>().await;
        }
        sleep(Duration::from_millis(5500)).await;
        Ok(json!("first"))
    })
    .without_heartbeat();
    engine.submit(work, "t1", Arguments::new()).unwrap();

    sleep(Duration::from_millis(4500)).await;
    assert_ne!(engine.status("t1").unwrap().attempt_id, "t1");

    sleep(Duration::from_millis(1250)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, Some(json!("first")));
}

#[tokio::test(start_paused = true)]
async fn test_failure_from_superseded_attempt_is_ignored() {
    let engine = Engine::new(crash_config()).unwrap();
    let work = Work::new(|ctx: WorkContext| async move {
        sleep(Duration::from_millis(5500)).await;
        if ctx.is_retry() {
            Ok(json!(ctx.attempt_number))
        } else {
            Err(WorkError::failed("stale attempt failed"))
        }
    })
    .without_heartbeat();
    engine.submit(work, "t1", Arguments::new()).unwrap();

    sleep(Duration::from_secs(6)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Running);
    assert_eq!(view.error, None);

    // the second attempt started at 4s and finishes at 9.5s
    sleep(Duration::from_millis(3750)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, Some(json!(2)));
}

// ============================================
// Reaping
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_completed_task_is_reaped() {
    let engine = Engine::new(crash_config()).unwrap();
    engine.submit(sleeper_ms(1500), "t1", Arguments::new()).unwrap();

    sleep(Duration::from_millis(1750)).await;
    assert_eq!(engine.status("t1").unwrap().status, TaskStatus::Completed);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(
        engine.status("t1"),
        Err(EngineError::TaskNotFound("t1".into()))
    );
    assert_eq!(
        engine.attempt("t1").unwrap_err(),
        EngineError::AttemptNotFound("t1".into())
    );
    assert_eq!(engine.task_count(), 0);
    assert_eq!(engine.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reaping_removes_every_attempt() {
    let engine = Engine::new(crash_config()).unwrap();
    let work = Work::new(|ctx: WorkContext| async move {
        if ctx.attempt_number < 3 {
            std::future::pending::<()>().await;
        }
        Ok(json!(ctx.attempt_number))
    })
    .without_heartbeat();
    engine.submit(work, "t1", Arguments::new()).unwrap();

    // resubmitted at 4s and again at 8s; the third attempt completes at once
    sleep(Duration::from_millis(8500)).await;
    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result, Some(json!(3)));
    assert_eq!(engine.attempt_count(), 3);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.task_count(), 0);
    assert_eq!(engine.attempt_count(), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_expiring_one_task_leaves_another_untouched() {
    let engine = Engine::new(crash_config()).unwrap();
    engine
        .submit(sleeper_ms(5500).without_heartbeat(), "stalled", Arguments::new())
        .unwrap();
    engine.submit(sleeper(30), "healthy", Arguments::new()).unwrap();

    let assert_healthy = |engine: &Engine| {
        let view = engine.status("healthy").unwrap();
        assert_eq!(view.status, TaskStatus::Running);
        assert_eq!(view.attempt_id, "healthy");
        assert_eq!(view.attempts, 1);

        let attempt = engine.attempt("healthy").unwrap();
        assert_eq!(attempt.task_id, "healthy");
        assert_eq!(attempt.number, 1);
        assert_eq!(attempt.info["reason"], "initial");
        assert!(attempt.since_heartbeat <= Duration::from_secs(1));
    };

    // "stalled" is resubmitted at 4s
    sleep(Duration::from_millis(4500)).await;
    assert_eq!(engine.status("stalled").unwrap().attempts, 2);
    assert_eq!(engine.attempt_count(), 3);
    assert_healthy(&engine);

    // its first attempt completes at 5.5s and the task is reaped at 6s
    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        engine.status("stalled"),
        Err(EngineError::TaskNotFound("stalled".into()))
    );
    assert_eq!(engine.task_count(), 1);
    assert_eq!(engine.attempt_count(), 1);
    assert_healthy(&engine);
}

// ============================================
// Concurrency
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_pool_bounds_concurrency() {
    let engine = Engine::new(EngineConfig::default().with_max_workers(2)).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let work = {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        Work::new(move |_ctx| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_secs(1)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        })
    };

    for i in 0..5 {
        engine
            .submit(work.clone(), &format!("t{}", i), Arguments::new())
            .unwrap();
    }
    assert_eq!(engine.in_flight(), 5);

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    for i in 0..5 {
        let view = engine.status(&format!("t{}", i)).unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.attempts, 1);
    }
}

// ============================================
// Shutdown
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_waits_for_work() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.submit(sleeper(3), "t1", Arguments::new()).unwrap();

    let start = Instant::now();
    engine.shutdown().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(engine.in_flight(), 0);

    // monitor is gone, so the finished task is never reaped
    assert_eq!(engine.status("t1").unwrap().status, TaskStatus::Completed);
    assert_eq!(
        engine.submit(sleeper(1), "t2", Arguments::new()),
        Err(EngineError::ShuttingDown)
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_resubmission_after_shutdown() {
    let engine = Engine::new(crash_config()).unwrap();
    engine
        .submit(sleeper(10).without_heartbeat(), "t1", Arguments::new())
        .unwrap();

    sleep(Duration::from_millis(500)).await;
    engine.shutdown().await.unwrap();

    let view = engine.status("t1").unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.attempt_id, "t1");
    assert_eq!(view.attempts, 1);
}
