use std::sync::Arc;

use openehr::RowElement;
use rayon::prelude::*;

use crate::config::LinkageConfig;
use crate::PseudonymizationResult;

/// Bounded worker pool for row-wise translation.
///
/// MPI lookups block on I/O, so rows run on a dedicated pool of `worker_threads` threads instead
/// of the global rayon pool.
#[derive(Clone)]
pub struct RowExecutor {
    pool: Arc<rayon::ThreadPool>,
}

impl RowExecutor {
    pub fn new(worker_threads: usize) -> PseudonymizationResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|index| format!("psn-row-{index}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn from_config(config: &LinkageConfig) -> PseudonymizationResult<Self> {
        Self::new(config.worker_threads)
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Maps every row through `translate_row` in parallel.
    ///
    /// Output rows keep the input order. `Ok(None)` drops a row. The first `Err` aborts the whole
    /// batch and no rows are returned.
    pub fn map_rows<F>(
        &self,
        rows: &[Vec<RowElement>],
        translate_row: F,
    ) -> PseudonymizationResult<Vec<Vec<RowElement>>>
    where
        F: Fn(usize, &[RowElement]) -> PseudonymizationResult<Option<Vec<RowElement>>>
            + Send
            + Sync,
    {
        let translated = self.read_rows(rows, translate_row)?;
        Ok(translated.into_iter().flatten().collect())
    }

    /// Reads one value out of every row in parallel, keeping the input order and failing fast.
    pub fn read_rows<T, F>(
        &self,
        rows: &[Vec<RowElement>],
        read_row: F,
    ) -> PseudonymizationResult<Vec<T>>
    where
        T: Send,
        F: Fn(usize, &[RowElement]) -> PseudonymizationResult<T> + Send + Sync,
    {
        self.pool.install(|| {
            rows.par_iter()
                .enumerate()
                .map(|(index, row)| read_row(index, row))
                .collect()
        })
    }
}

impl std::fmt::Debug for RowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowExecutor")
            .field("worker_threads", &self.worker_threads())
            .finish()
    }
}
