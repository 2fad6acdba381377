use std::sync::{Arc, Barrier};
use std::time::Duration;

use time::macros::datetime;

use opsgate_core::locking::{
    ExemptActionsPolicy, InMemoryLockManager, LockAcquisition, LockGuard, LockManager,
};
use opsgate_core::models::ActionId;

fn manager() -> InMemoryLockManager {
    InMemoryLockManager::default()
}

#[test]
fn second_caller_receives_the_active_run_to_join() {
    let locks = manager();
    let deploy = ActionId::from("deploy");
    let t0 = datetime!(2026-05-01 10:00:00 UTC);

    let first = locks.acquire_at(&deploy, t0);
    let LockAcquisition::Acquired {
        run_id,
        acquired_at,
    } = first
    else {
        panic!("first acquisition should be granted");
    };
    assert_eq!(acquired_at, t0);
    assert_eq!(run_id.timestamp_component(), "20260501T100000Z");

    let second = locks.acquire_at(&deploy, t0 + Duration::from_secs(5));
    assert_eq!(
        second,
        LockAcquisition::Rejected {
            run_id: run_id.clone(),
            started_at: t0,
        }
    );
    assert_eq!(locks.peek(&deploy).unwrap().run_id, run_id);
}

#[test]
fn release_makes_the_action_available_again() {
    let locks = manager();
    let deploy = ActionId::from("deploy");
    let t0 = datetime!(2026-05-01 10:00:00 UTC);

    let first = locks.acquire_at(&deploy, t0);
    locks.release(&deploy);
    locks.release(&deploy);
    assert!(locks.peek(&deploy).is_none());

    let second = locks.acquire_at(&deploy, t0 + Duration::from_secs(60));
    assert!(second.is_acquired());
    assert_ne!(second.run_id(), first.run_id());
}

#[test]
fn stale_holder_is_evicted_only_after_the_ttl() {
    let policy = ExemptActionsPolicy::new(Vec::new(), Duration::from_secs(300));
    let locks = InMemoryLockManager::new(Arc::new(policy));
    let backtest = ActionId::from("backtest");
    let t0 = datetime!(2026-05-01 10:00:00 UTC);

    let original = locks.acquire_at(&backtest, t0);
    let at_ttl = locks.acquire_at(&backtest, t0 + Duration::from_secs(300));
    assert!(!at_ttl.is_acquired());
    assert_eq!(at_ttl.run_id(), original.run_id());

    let after_ttl = locks.acquire_at(&backtest, t0 + Duration::from_secs(301));
    assert!(after_ttl.is_acquired());
    assert_ne!(after_ttl.run_id(), original.run_id());
    assert_eq!(locks.peek(&backtest).unwrap().run_id, *after_ttl.run_id());
}

#[test]
fn evicted_holder_cannot_release_its_replacement() {
    let locks = manager();
    let backtest = ActionId::from("backtest");
    let t0 = datetime!(2026-05-01 10:00:00 UTC);

    let original = locks.acquire_at(&backtest, t0);
    let replacement = locks.acquire_at(&backtest, t0 + Duration::from_secs(301));
    assert!(replacement.is_acquired());

    assert!(!locks.release_run(&backtest, original.run_id()));
    assert_eq!(locks.peek(&backtest).unwrap().run_id, *replacement.run_id());
    assert!(locks.release_run(&backtest, replacement.run_id()));
    assert!(locks.peek(&backtest).is_none());
}

#[test]
fn exempt_actions_are_never_rejected() {
    let locks = manager();
    let health = ActionId::from("health_check");
    let t0 = datetime!(2026-05-01 10:00:00 UTC);

    let first = locks.acquire_at(&health, t0);
    let second = locks.acquire_at(&health, t0 + Duration::from_secs(1));
    let third = locks.acquire_at(&health, t0 + Duration::from_secs(2));

    assert!(first.is_acquired());
    assert!(second.is_acquired());
    assert!(third.is_acquired());
    assert_eq!(locks.peek(&health).unwrap().run_id, *first.run_id());
}

#[test]
fn held_lists_entries_sorted_by_action() {
    let locks = manager();
    let t0 = datetime!(2026-05-01 10:00:00 UTC);
    locks.acquire_at(&ActionId::from("session_login"), t0);
    locks.acquire_at(&ActionId::from("deploy"), t0);

    let held: Vec<String> = locks
        .held()
        .into_iter()
        .map(|entry| entry.action.to_string())
        .collect();
    assert_eq!(held, vec!["deploy".to_string(), "session_login".to_string()]);
}

#[test]
fn guard_releases_on_drop() {
    let locks: Arc<dyn LockManager> = Arc::new(manager());
    let deploy = ActionId::from("deploy");

    let LockAcquisition::Acquired {
        run_id,
        acquired_at,
    } = locks.acquire(&deploy)
    else {
        panic!("expected grant");
    };
    {
        let guard = LockGuard::new(locks.clone(), deploy.clone(), run_id.clone(), acquired_at);
        assert_eq!(guard.run_id(), &run_id);
        assert!(!locks.acquire(&deploy).is_acquired());
    }
    assert!(locks.peek(&deploy).is_none());
}

#[test]
fn concurrent_callers_get_exactly_one_grant() {
    let locks = Arc::new(manager());
    let deploy = ActionId::from("deploy");
    let callers = 16;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let locks = locks.clone();
            let deploy = deploy.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                locks.acquire(&deploy)
            })
        })
        .collect();
    let outcomes: Vec<LockAcquisition> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let granted: Vec<_> = outcomes.iter().filter(|outcome| outcome.is_acquired()).collect();
    assert_eq!(granted.len(), 1);
    let winner = granted[0].run_id();
    assert!(outcomes.iter().all(|outcome| outcome.run_id() == winner));
}
