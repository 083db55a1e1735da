use anyhow::{anyhow, Result};

/// Success and failure counts of a batched operation. Failures carry the unit
/// name so they can be reported together at the end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }
}

/// Runs `work` over `items` in chunks of `batch_size`, one scoped thread per
/// item, and waits for each chunk before starting the next. Results keep the
/// order of `items`; a panic in one unit becomes that unit's error.
pub fn run_batched<T, R, F>(items: &[T], batch_size: usize, work: F) -> Vec<Result<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    let work = &work;
    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(batch_size.max(1)) {
        std::thread::scope(|s| {
            let handles = chunk
                .iter()
                .map(|item| s.spawn(move || work(item)))
                .collect::<Vec<_>>();
            for handle in handles {
                results.push(
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("worker panicked"))),
                );
            }
        });
    }
    results
}

/// Tallies `results` against the unit names in `names` (same order).
pub fn tally<R>(names: &[String], results: Vec<Result<R>>) -> (BatchReport, Vec<R>) {
    let mut report = BatchReport::default();
    let mut values = Vec::new();
    for (name, result) in names.iter().zip(results) {
        match result {
            Ok(value) => {
                report.succeeded += 1;
                values.push(value);
            }
            Err(err) => {
                tracing::warn!(unit = %name, error = %format!("{err:#}"), "batch unit failed");
                report.failed.push((name.clone(), format!("{err:#}")));
            }
        }
    }
    (report, values)
}
