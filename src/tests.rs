//! Crate-level behavioral tests: the contract of the engine as a whole,
//! exercised through the public surface only. Per-module edge cases live
//! in the `#[cfg(test)]` blocks next to the code they cover.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Engine, EngineError, Value, ITERATION_LIMIT};

fn int(container: &crate::Container, key: &str) -> i64 {
    container.get(key).and_then(|e| e.as_i64()).unwrap_or(0)
}

#[test]
fn batched_mutations_are_atomic() {
    let engine = Engine::new();
    let state = engine
        .wrap(Value::from_iter([
            ("count", Value::Int(0)),
            ("title", Value::from("A")),
        ]))
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let title = state_clone
            .get("title")
            .and_then(|e| e.as_str().map(str::to_owned))
            .unwrap_or_default();
        let count = int(&state_clone, "count");
        log_clone.lock().push(format!("{title}:{count}"));
    });
    assert_eq!(*log.lock(), vec!["A:0"]);

    engine.batch(|| {
        state.set("count", 1);
        state.set("title", "B");
        // Nothing has run yet; the batch is still open.
        assert_eq!(log.lock().len(), 1);
    });

    // Exactly one rerun, observing both final values.
    assert_eq!(*log.lock(), vec!["A:0", "B:1"]);
}

#[test]
fn no_spurious_reruns() {
    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("a", 1);
    state.set("b", 1);

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let _ = state_clone.get("a");
        runs_clone.fetch_add(1, Ordering::Relaxed);
    });
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    state.set("b", 2);
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    state.set("a", 2);
    assert_eq!(runs.load(Ordering::Relaxed), 2);

    // Writing the identical value back is a no-op, not a trigger.
    state.set("a", 2);
    assert_eq!(runs.load(Ordering::Relaxed), 2);
}

#[test]
fn conditional_reads_refresh_the_dependency_set() {
    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("flag", true);
    state.set("x", 0);

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let flagged = state_clone
            .get("flag")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);
        if flagged {
            let _ = state_clone.get("x");
        }
        runs_clone.fetch_add(1, Ordering::Relaxed);
    });
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    // While the flag is up, x is a dependency.
    state.set("x", 1);
    assert_eq!(runs.load(Ordering::Relaxed), 2);

    // Flag drops: the rerun no longer reads x, so the x subscription is
    // retired with it.
    state.set("flag", false);
    assert_eq!(runs.load(Ordering::Relaxed), 3);

    state.set("x", 2);
    state.set("x", 3);
    assert_eq!(runs.load(Ordering::Relaxed), 3);

    // Raising the flag re-establishes the x subscription.
    state.set("flag", true);
    assert_eq!(runs.load(Ordering::Relaxed), 4);
    state.set("x", 4);
    assert_eq!(runs.load(Ordering::Relaxed), 5);
}

#[test]
fn disposal_is_final_even_for_queued_triggers() {
    cov_mark::check!(disposed_skipped_at_flush);

    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("x", 0);

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let state_clone = state.clone();
    let effect = engine.effect(move || {
        let _ = state_clone.get("x");
        runs_clone.fetch_add(1, Ordering::Relaxed);
    });
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    // The trigger is parked in the batch before disposal; disposal must
    // still win (skip-on-dequeue).
    engine.batch(|| {
        state.set("x", 1);
        effect.dispose();
    });
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    state.set("x", 2);
    assert_eq!(runs.load(Ordering::Relaxed), 1);
    assert!(effect.is_disposed());
}

#[test]
fn nested_batches_flatten_to_one_run() {
    let run_batched = |nest: bool| -> usize {
        let engine = Engine::new();
        let state = engine.wrap(Value::map()).unwrap();
        state.set("x", 0);
        state.set("y", 0);
        state.set("z", 0);

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let state_clone = state.clone();
        let _effect = engine.effect(move || {
            let _ = state_clone.get("x");
            let _ = state_clone.get("y");
            let _ = state_clone.get("z");
            runs_clone.fetch_add(1, Ordering::Relaxed);
        });

        engine.batch(|| {
            state.set("x", 1);
            if nest {
                engine.batch(|| state.set("y", 2));
            } else {
                state.set("y", 2);
            }
            state.set("z", 3);
        });
        runs.load(Ordering::Relaxed)
    };

    assert_eq!(run_batched(true), run_batched(false));
    assert_eq!(run_batched(true), 2); // first run + one flush run
}

#[test]
fn raw_extraction_registers_no_dependencies() {
    let engine = Engine::new();
    let state = engine
        .wrap(Value::from_iter([(
            "nested",
            Value::from_iter([("deep", Value::Int(1))]),
        )]))
        .unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let _snapshot = state_clone.raw();
        runs_clone.fetch_add(1, Ordering::Relaxed);
    });
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    // Mutations anywhere in the tree leave the snapshot-only effect alone.
    state.set("top", 5);
    let nested = state.get("nested").unwrap().into_container().unwrap();
    nested.set("deep", 2);
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    // And the snapshot itself sees through wrapped children.
    let snapshot = state.raw();
    let map = snapshot.as_map().unwrap();
    assert_eq!(
        map["nested"].as_map().unwrap()["deep"],
        Value::Int(2)
    );
}

#[test]
fn self_recursion_converges_when_bounded() {
    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("n", 0);

    // Increments until a threshold well under the ceiling, then stops.
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let n = int(&state_clone, "n");
        if n < 10 {
            state_clone.set("n", n + 1);
        }
    });

    engine.batch(|| state.set("n", 0));
    assert_eq!(int(&state, "n"), 10);
}

#[test]
fn unbounded_self_recursion_reports_and_returns() {
    cov_mark::check!(flush_rerun_throttled);

    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("n", 0);

    // Always increments the field it reads: can never stabilize. The
    // eager first run already gets throttled (before the handler is
    // installed, so it is not counted here).
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let n = int(&state_clone, "n");
        state_clone.set("n", n + 1);
    });

    let overflowed = Arc::new(AtomicUsize::new(0));
    let overflowed_clone = overflowed.clone();
    engine.set_error_handler(move |err| {
        if matches!(err, EngineError::ReentrancyOverflow { .. }) {
            overflowed_clone.fetch_add(1, Ordering::Relaxed);
        }
    });

    engine.batch(|| state.set("n", 1000));

    // Throttled and reported, not hung; the queue is drained.
    assert_eq!(overflowed.load(Ordering::Relaxed), 1);
    assert_eq!(engine.pending_effects(), 0);
    assert!(int(&state, "n") >= 1000);
}

#[test]
fn unbatched_self_recursion_is_bounded_too() {
    cov_mark::check!(inline_rerun_throttled);

    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("n", 0);

    let overflowed = Arc::new(AtomicUsize::new(0));
    let overflowed_clone = overflowed.clone();
    engine.set_error_handler(move |err| {
        if matches!(err, EngineError::ReentrancyOverflow { .. }) {
            overflowed_clone.fetch_add(1, Ordering::Relaxed);
        }
    });

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        runs_clone.fetch_add(1, Ordering::Relaxed);
        let n = int(&state_clone, "n");
        state_clone.set("n", n + 1);
    });

    // No batch: the immediate path must also terminate with a report.
    assert_eq!(overflowed.load(Ordering::Relaxed), 1);
    assert!(runs.load(Ordering::Relaxed) <= ITERATION_LIMIT + 1);
}

#[test]
fn sequential_batches_flush_in_order() {
    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("x", 0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        seen_clone.lock().push(int(&state_clone, "x"));
    });

    engine.batch(|| state.set("x", 1));
    engine.batch(|| state.set("x", 2));

    // The first flush completes before the second body begins.
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

#[test]
fn effect_failure_leaves_the_flush_and_graph_intact() {
    let engine = Engine::new();
    let state = engine.wrap(Value::map()).unwrap();
    state.set("x", 0);

    let failures = Arc::new(AtomicUsize::new(0));
    let failures_clone = failures.clone();
    engine.set_error_handler(move |err| {
        if matches!(err, EngineError::EffectFailed { .. }) {
            failures_clone.fetch_add(1, Ordering::Relaxed);
        }
    });

    let faulty_runs = Arc::new(AtomicUsize::new(0));
    let healthy_runs = Arc::new(AtomicUsize::new(0));

    let runs = faulty_runs.clone();
    let state_clone = state.clone();
    let _faulty = engine.effect(move || {
        let n = int(&state_clone, "x");
        runs.fetch_add(1, Ordering::Relaxed);
        if n > 0 {
            panic!("faulty body");
        }
    });
    let runs = healthy_runs.clone();
    let state_clone = state.clone();
    let _healthy = engine.effect(move || {
        let _ = state_clone.get("x");
        runs.fetch_add(1, Ordering::Relaxed);
    });

    // Both are pending in the same flush; the faulty one panics first.
    engine.batch(|| state.set("x", 1));
    assert_eq!(failures.load(Ordering::Relaxed), 1);
    assert_eq!(faulty_runs.load(Ordering::Relaxed), 2);
    assert_eq!(healthy_runs.load(Ordering::Relaxed), 2);

    // The faulty effect's subscriptions survive the panic.
    engine.batch(|| state.set("x", 2));
    assert_eq!(failures.load(Ordering::Relaxed), 2);
    assert_eq!(faulty_runs.load(Ordering::Relaxed), 3);
    assert_eq!(healthy_runs.load(Ordering::Relaxed), 3);
}

#[test]
fn nested_container_identity_is_stable() {
    let engine = Engine::new();
    let state = engine
        .wrap(Value::from_iter([(
            "user",
            Value::from_iter([("name", Value::from("ada"))]),
        )]))
        .unwrap();

    let first = state.get("user").unwrap().into_container().unwrap();
    let second = state.get("user").unwrap().into_container().unwrap();
    assert_eq!(first, second);

    // Mutations through either handle are visible through the other.
    first.set("name", "grace");
    assert_eq!(
        second.get("name").and_then(|e| e.as_value().cloned()),
        Some(Value::from("grace"))
    );
}

#[test]
fn mutation_through_a_nested_container_reaches_subscribers() {
    let engine = Engine::new();
    let state = engine
        .wrap(Value::from_iter([(
            "items",
            Value::from_iter([Value::Int(1), Value::Int(2)]),
        )]))
        .unwrap();

    let totals = Arc::new(Mutex::new(Vec::new()));
    let totals_clone = totals.clone();
    let state_clone = state.clone();
    let _effect = engine.effect(move || {
        let items = state_clone.get("items").unwrap().into_container().unwrap();
        let mut total = 0;
        for i in 0..items.len() {
            total += items.get(i).and_then(|e| e.as_i64()).unwrap_or(0);
        }
        totals_clone.lock().push(total);
    });
    assert_eq!(*totals.lock(), vec![3]);

    let items = state.get("items").unwrap().into_container().unwrap();
    items.push(10);
    assert_eq!(*totals.lock(), vec![3, 13]);

    items.set(0, 5);
    assert_eq!(*totals.lock(), vec![3, 13, 17]);
}
