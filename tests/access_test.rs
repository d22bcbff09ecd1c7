//! Tests for [`AccessController`] — per-caller sliding rate windows.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use heimdallr::throttle::{AccessController, CallerRule, ThrottleContext, ThrottleScope};

fn rule(key: &str, max_count: u32, unit_ms: u64) -> CallerRule {
    CallerRule {
        key: key.to_string(),
        max_count,
        unit_ms,
        prohibit_ms: 0,
    }
}

#[test]
fn two_of_three_then_recovery_after_window() {
    // scenario: IP-based throttle, limit 2 per window; three requests from
    // the same IP inside the window, a fourth after it elapses
    let context = ThrottleContext::new(ThrottleScope::Ip, vec![rule("192.168.1.7", 2, 50)]);
    let controller = AccessController::new();

    assert!(controller.can_access(&context, "192.168.1.7", ThrottleScope::Ip).unwrap());
    assert!(controller.can_access(&context, "192.168.1.7", ThrottleScope::Ip).unwrap());
    assert!(!controller.can_access(&context, "192.168.1.7", ThrottleScope::Ip).unwrap());

    thread::sleep(Duration::from_millis(80));
    assert!(controller.can_access(&context, "192.168.1.7", ThrottleScope::Ip).unwrap());
}

#[test]
fn denied_calls_are_not_recorded() {
    let context = ThrottleContext::new(ThrottleScope::Ip, vec![rule("10.0.0.1", 2, 60)]);
    let controller = AccessController::new();

    assert!(controller.can_access(&context, "10.0.0.1", ThrottleScope::Ip).unwrap());
    assert!(controller.can_access(&context, "10.0.0.1", ThrottleScope::Ip).unwrap());

    // a burst of denials must not extend the lock-out: once the two granted
    // accesses age out, access returns
    for _ in 0..20 {
        assert!(!controller.can_access(&context, "10.0.0.1", ThrottleScope::Ip).unwrap());
    }
    thread::sleep(Duration::from_millis(90));
    assert!(controller.can_access(&context, "10.0.0.1", ThrottleScope::Ip).unwrap());
}

#[test]
fn domain_scope_keys_are_domains() {
    let context = ThrottleContext::new(
        ThrottleScope::Domain,
        vec![rule("partner.example.com", 1, 60_000)],
    );
    let controller = AccessController::new();

    assert!(controller
        .can_access(&context, "partner.example.com", ThrottleScope::Domain)
        .unwrap());
    assert!(!controller
        .can_access(&context, "partner.example.com", ThrottleScope::Domain)
        .unwrap());
    // a different domain has no rule and passes freely
    assert!(controller
        .can_access(&context, "elsewhere.example.org", ThrottleScope::Domain)
        .unwrap());
}

#[test]
fn concurrent_callers_on_one_key_respect_the_limit() {
    const LIMIT: u32 = 16;
    let context = Arc::new(ThrottleContext::new(
        ThrottleScope::Ip,
        vec![rule("10.0.0.1", LIMIT, 60_000)],
    ));
    let granted = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    for _ in 0..8 {
        let context = Arc::clone(&context);
        let granted = Arc::clone(&granted);
        handles.push(thread::spawn(move || {
            let controller = AccessController::new();
            for _ in 0..20 {
                if controller
                    .can_access(&context, "10.0.0.1", ThrottleScope::Ip)
                    .unwrap()
                {
                    granted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        h.join().expect("thread panicked");
    }

    // 160 attempts within one long window, exactly LIMIT grants
    assert_eq!(granted.load(Ordering::Relaxed), LIMIT);
}

#[test]
fn catch_all_and_exact_rules_coexist() {
    let context = ThrottleContext::new(
        ThrottleScope::Ip,
        vec![rule("10.0.0.1", 3, 60_000), rule("other", 1, 60_000)],
    );
    let controller = AccessController::new();

    // exact rule for the known caller
    for _ in 0..3 {
        assert!(controller.can_access(&context, "10.0.0.1", ThrottleScope::Ip).unwrap());
    }
    assert!(!controller.can_access(&context, "10.0.0.1", ThrottleScope::Ip).unwrap());

    // catch-all for everyone else, with independent windows per caller
    assert!(controller.can_access(&context, "10.0.0.2", ThrottleScope::Ip).unwrap());
    assert!(!controller.can_access(&context, "10.0.0.2", ThrottleScope::Ip).unwrap());
    assert!(controller.can_access(&context, "10.0.0.3", ThrottleScope::Ip).unwrap());
}
