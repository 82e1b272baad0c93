//! Property-based tests for throttle module.
//!
//! Verifies the per-connection coalescing rules:
//! - Any burst inside one window yields at most one emission per address
//! - The emitted value is the last submitted one
//! - Re-submitting the stored value never emits
//! - Teardown drops everything; nothing fires afterwards
//! - Stats stay consistent with the recorded sends

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use paramlink_core::config::ParameterDef;
use paramlink_core::emitter::MemoryEmitter;
use paramlink_core::registry::ParameterRegistry;
use paramlink_core::throttle::{FireOutcome, ThrottleEngine};

const ADDRESSES: [&str; 3] = ["/p/a", "/p/b", "/p/c"];
const INTERVAL: Duration = Duration::from_millis(16);

fn setup() -> (ThrottleEngine, Arc<ParameterRegistry>, Arc<MemoryEmitter>) {
    let defs: Vec<ParameterDef> = ADDRESSES
        .iter()
        .map(|a| ParameterDef::new(*a, 0.0, -100.0, 100.0))
        .collect();
    let registry = Arc::new(ParameterRegistry::from_definitions(&defs).unwrap());
    let emitter = Arc::new(MemoryEmitter::new());
    let engine = ThrottleEngine::new(1, INTERVAL, registry.clone(), emitter.clone());
    (engine, registry, emitter)
}

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

/// (address index, value, offset within the window in ms)
fn arb_submission() -> impl Strategy<Value = (usize, f64, u64)> {
    (0..ADDRESSES.len(), -100.0f64..100.0, 0u64..16)
}

fn arb_burst() -> impl Strategy<Value = Vec<(usize, f64, u64)>> {
    prop::collection::vec(arb_submission(), 1..40).prop_map(|mut v| {
        v.sort_by_key(|s| s.2);
        v
    })
}

// ────────────────────────────────────────────────────────────────────
// Coalescing
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// One burst within a window: at most one send per address, carrying the last value.
    #[test]
    fn prop_burst_coalesces_to_last_value(burst in arb_burst()) {
        let (mut engine, registry, emitter) = setup();
        let start = Instant::now();

        let mut last = [None; ADDRESSES.len()];
        for &(idx, value, offset) in &burst {
            engine.submit(ADDRESSES[idx], value, start + Duration::from_millis(offset));
            last[idx] = Some(value);
        }

        // Deadlines are anchored on the first submission per address, so all fire by 2 windows.
        engine.fire_due(start + INTERVAL * 2);
        prop_assert_eq!(engine.pending_len(), 0);

        for (idx, address) in ADDRESSES.iter().enumerate() {
            let sent = emitter.sent_to(address);
            prop_assert!(sent.len() <= 1, "{} sent {} times", address, sent.len());
            match last[idx] {
                Some(value) if value != 0.0 => {
                    prop_assert_eq!(sent, vec![value]);
                    prop_assert_eq!(registry.value(address).unwrap(), value);
                }
                _ => prop_assert!(sent.is_empty()),
            }
        }
    }

    /// Nothing fires before the first deadline.
    #[test]
    fn prop_nothing_fires_early(burst in arb_burst()) {
        let (mut engine, _registry, emitter) = setup();
        let start = Instant::now();
        for &(idx, value, _) in &burst {
            engine.submit(ADDRESSES[idx], value, start);
        }
        let fired = engine.fire_due(start + INTERVAL - Duration::from_millis(1));
        prop_assert!(fired.is_empty());
        prop_assert!(emitter.is_empty());
    }

    /// Re-submitting the stored value is a no-op on the wire.
    #[test]
    fn prop_unchanged_value_not_sent(repeats in 1usize..10) {
        let (mut engine, _registry, emitter) = setup();
        let start = Instant::now();
        for _ in 0..repeats {
            engine.submit(ADDRESSES[0], 0.0, start);
        }
        let fired = engine.fire_due(start + INTERVAL);
        prop_assert_eq!(fired.len(), 1);
        let unchanged = matches!(fired[0].1, FireOutcome::Unchanged { .. });
        prop_assert!(unchanged);
        prop_assert!(emitter.is_empty());
    }

    /// Teardown cancels every pending emission.
    #[test]
    fn prop_teardown_cancels_all(burst in arb_burst()) {
        let (mut engine, registry, emitter) = setup();
        let start = Instant::now();
        for &(idx, value, offset) in &burst {
            engine.submit(ADDRESSES[idx], value, start + Duration::from_millis(offset));
        }
        let pending = engine.pending_len();
        prop_assert_eq!(engine.teardown(), pending);
        prop_assert_eq!(engine.teardown(), 0);

        prop_assert!(engine.fire_due(start + INTERVAL * 10).is_empty());
        prop_assert!(emitter.is_empty());
        for address in ADDRESSES {
            prop_assert_eq!(registry.value(address).unwrap(), 0.0);
        }
    }

    /// Counters agree with what the emitter saw.
    #[test]
    fn prop_stats_match_sends(bursts in prop::collection::vec(arb_burst(), 1..5)) {
        let (mut engine, _registry, emitter) = setup();
        let mut now = Instant::now();
        let mut submissions = 0u64;
        for burst in &bursts {
            for &(idx, value, offset) in burst {
                engine.submit(ADDRESSES[idx], value, now + Duration::from_millis(offset));
                submissions += 1;
            }
            now += INTERVAL * 2;
            engine.fire_due(now);
        }
        let stats = engine.stats();
        prop_assert_eq!(stats.submitted, submissions);
        prop_assert_eq!(stats.emitted, emitter.len() as u64);
        prop_assert_eq!(
            stats.submitted,
            stats.coalesced + stats.emitted + stats.unchanged + stats.emit_failures + stats.rejected
        );
    }
}
