use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

/// Bounded-parallelism runner. A fixed pool of workers pulls indices from a
/// shared cursor and processes items one at a time until the cursor runs out.
///
/// Results land in a slot per input index, so output order matches input
/// order regardless of completion order. A failed item leaves its slot `None`
/// and is reported to the error callback; it never stops other workers.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    concurrency: usize,
}

impl BatchExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<'a, T, R, E, F, Fut, H>(
        &self,
        items: &'a [T],
        mapper: F,
        on_error: H,
    ) -> Vec<Option<R>>
    where
        T: Sync,
        F: Fn(usize, &'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        H: Fn(usize, &'a T, E),
    {
        let total = items.len();
        let workers = self.concurrency.min(total);
        let cursor = AtomicUsize::new(0);

        let cursor = &cursor;
        let mapper = &mapper;
        let on_error = &on_error;

        let pool = (0..workers).map(move |_| async move {
            let mut finished = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= total {
                    break;
                }
                let item = &items[index];
                match mapper(index, item).await {
                    Ok(value) => finished.push((index, value)),
                    Err(err) => on_error(index, item, err),
                }
            }
            finished
        });

        // Each worker hands back its own (index, value) pairs; slots are
        // filled after the pool drains, so no slot is shared while running.
        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        for (index, value) in join_all(pool).await.into_iter().flatten() {
            slots[index] = Some(value);
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlight {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn measure_peak(items: usize, limit: usize) -> usize {
        let inputs: Vec<u64> = (0..items as u64).collect();
        let gauge = InFlight::new();
        let gauge_ref = &gauge;
        let executor = BatchExecutor::new(limit);
        let results = executor
            .run(
                &inputs,
                move |_, value| async move {
                    gauge_ref.enter();
                    tokio::time::sleep(Duration::from_millis(5 + (value % 3) * 4)).await;
                    gauge_ref.leave();
                    Ok::<_, String>(*value)
                },
                |_, _, _| {},
            )
            .await;
        assert_eq!(results.len(), items);
        gauge.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_bound() {
        let peak = measure_peak(25, 4).await;
        assert!(peak <= 4, "peak {peak} exceeded bound");
        assert_eq!(peak, 4);

        let peak = measure_peak(2, 6).await;
        assert!(peak <= 2, "peak {peak} with fewer items than workers");
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let inputs = vec![30u64, 5, 20, 1, 10];
        let executor = BatchExecutor::new(3);
        let results = executor
            .run(
                &inputs,
                |index, delay| async move {
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    Ok::<_, String>(index * 10)
                },
                |_, _, _| {},
            )
            .await;
        assert_eq!(
            results,
            vec![Some(0), Some(10), Some(20), Some(30), Some(40)]
        );
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_the_rest() {
        let inputs = vec!["a", "boom", "c", "d"];
        let failures = Mutex::new(Vec::new());
        let executor = BatchExecutor::new(2);
        let results = executor
            .run(
                &inputs,
                |_, item| async move {
                    if *item == "boom" {
                        Err(format!("{item} failed"))
                    } else {
                        Ok(item.to_uppercase())
                    }
                },
                |index, _, err| failures.lock().expect("failures lock").push((index, err)),
            )
            .await;

        assert_eq!(
            results,
            vec![
                Some("A".to_string()),
                None,
                Some("C".to_string()),
                Some("D".to_string())
            ]
        );
        let failures = failures.into_inner().expect("failures");
        assert_eq!(failures, vec![(1, "boom failed".to_string())]);
    }

    #[tokio::test]
    async fn empty_input_returns_no_slots() {
        let inputs: Vec<u8> = Vec::new();
        let results = BatchExecutor::new(5)
            .run(&inputs, |_, v| async move { Ok::<_, ()>(*v) }, |_, _, _| {})
            .await;
        assert!(results.is_empty());
        assert_eq!(BatchExecutor::new(0).concurrency(), 1);
    }
}
