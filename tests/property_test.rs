//! Property-based checks for backoff arithmetic, attempt budgets, and
//! dependency-graph construction.

use proptest::prelude::*;

use maestro::domain::models::workflow::TaskSpec;
use maestro::domain::models::{RetryConfig, TaskGraph};
use maestro::services::retry::RetryController;

fn config(
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    backoff_base: f64,
    jitter: bool,
) -> RetryConfig {
    RetryConfig { max_attempts, initial_delay_ms, max_delay_ms, backoff_base, jitter }
}

proptest! {
    #[test]
    fn backoff_is_nondecreasing_and_capped(
        initial in 1u64..1_000,
        cap_factor in 1u64..100,
        base in 1.1f64..4.0,
        attempts in 2u32..12,
    ) {
        let max_delay = initial * cap_factor;
        let retry = config(attempts, initial, max_delay, base, false);

        let mut previous = 0u64;
        for attempt in 1..=attempts {
            let delay = retry.base_delay(attempt).as_millis() as u64;
            prop_assert!(delay >= previous, "attempt {attempt}: {delay} < {previous}");
            prop_assert!(delay <= max_delay, "attempt {attempt}: {delay} > cap {max_delay}");
            previous = delay;
        }

        // The first backoff is the initial delay (subject to the cap).
        let first = retry.base_delay(1).as_millis() as u64;
        prop_assert_eq!(first, initial.min(max_delay));
    }

    #[test]
    fn jittered_delay_stays_within_bounds(
        initial in 1u64..1_000,
        base in 1.1f64..4.0,
        attempt in 1u32..10,
    ) {
        let retry = config(10, initial, initial * 64, base, true);
        let controller = RetryController::new(retry.clone());

        let base_ms = retry.base_delay(attempt).as_millis() as u64;
        let delay = controller.delay(attempt).as_millis() as u64;
        // Uniform factor in [0.5, 1.5], with one-ms slack for truncation.
        prop_assert!(delay + 1 >= base_ms / 2, "{delay} below half of {base_ms}");
        prop_assert!(delay <= base_ms * 3 / 2 + 1, "{delay} above 1.5x of {base_ms}");
    }

    #[test]
    fn attempts_never_exceed_the_budget(max_attempts in 1u32..6) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let calls = runtime.block_on(async move {
            use std::sync::atomic::{AtomicU32, Ordering};
            use std::sync::Arc;

            let controller = RetryController::new(config(max_attempts, 1, 2, 2.0, false));
            let cancel = tokio_util::sync::CancellationToken::new();
            let calls = Arc::new(AtomicU32::new(0));
            let calls_op = Arc::clone(&calls);

            let result: Result<(), _> = controller
                .execute(&cancel, |_| {}, move |_| {
                    let calls = Arc::clone(&calls_op);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(maestro::domain::errors::InvokeError::Transport("fault".into()))
                    }
                })
                .await;
            assert!(result.is_err());
            calls.load(Ordering::SeqCst)
        });

        prop_assert_eq!(calls, max_attempts);
    }

    #[test]
    fn forward_only_dependencies_never_cycle(
        dep_picks in prop::collection::vec(
            prop::collection::vec(any::<prop::sample::Index>(), 0..3),
            1..15,
        ),
    ) {
        let tasks: Vec<TaskSpec> = dep_picks
            .iter()
            .enumerate()
            .map(|(i, picks)| {
                let mut depends_on: Vec<String> = picks
                    .iter()
                    .filter(|_| i > 0)
                    .map(|pick| format!("t{}", pick.index(i)))
                    .collect();
                depends_on.sort();
                depends_on.dedup();
                TaskSpec {
                    name: format!("t{i}"),
                    agent: "a1".to_string(),
                    action: "call".to_string(),
                    parameters: Default::default(),
                    depends_on,
                    timeout_secs: None,
                    retry: None,
                    continue_on_failure: false,
                }
            })
            .collect();

        let graph = TaskGraph::from_specs(&tasks).unwrap();
        prop_assert!(graph.find_cycle_member().is_none());

        // No task is its own transitive dependent in an acyclic graph.
        for task in &tasks {
            prop_assert!(!graph.transitive_dependents(&task.name).contains(&task.name));
        }
    }
}
