//! FILENAME: query-runtime/src/coordinator.rs
//! Decides cache-hit vs fetch, deduplicates concurrent identical
//! executions, and reconciles partial month coverage.

use std::sync::{Arc, Mutex};

use result_cache::{LocalResultCache, ResultShape, DEFAULT_PARTITION};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{ExecutionError, FetchError};
use crate::months::{MonthRange, YearMonth};
use crate::service::{QueryVariables, StalenessMarker};
use crate::worker::QueryExecutor;

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every requested partition was fetched (or the query had no range).
    Fetched,
    /// At least one partition fetched, at least one failed.
    Partial,
    /// Served entirely from the local cache.
    FromCache,
    /// An identical execution was already in flight; this call did nothing.
    Coalesced,
}

/// The result of one `run`. `sequence` is per query id; compare against
/// `ExecutionCoordinator::is_current` before applying a late arrival.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub query_id: String,
    pub sequence: u64,
    pub outcome: ExecutionOutcome,
    pub data: ResultShape,
    pub requested_partitions: usize,
    pub missing_partitions: usize,
}

// ============================================================================
// COORDINATOR
// ============================================================================

pub struct ExecutionCoordinator {
    cache: Arc<LocalResultCache>,
    executor: QueryExecutor,
    in_flight: Mutex<FxHashSet<String>>,
    sequences: Mutex<FxHashMap<String, u64>>,
}

/// Releases the dedup slot when an execution reaches a terminal state.
struct FlightGuard<'a> {
    coordinator: &'a ExecutionCoordinator,
    key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.key);
    }
}

impl ExecutionCoordinator {
    pub fn new(cache: Arc<LocalResultCache>, executor: QueryExecutor) -> Self {
        ExecutionCoordinator {
            cache,
            executor,
            in_flight: Mutex::new(FxHashSet::default()),
            sequences: Mutex::new(FxHashMap::default()),
        }
    }

    /// Runs (or coalesces) one execution. Serves from cache when the
    /// freshness probe reports no change and every requested month is
    /// cached; otherwise fetches the needed months concurrently (every
    /// month of the range when the marker moved, only the absent ones
    /// otherwise), persisting each as it completes, and reads the union
    /// back.
    pub async fn run(
        &self,
        query_id: &str,
        variables: &QueryVariables,
        range: Option<&MonthRange>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let key = execution_key(query_id, variables, range);
        let _guard = match self.try_acquire(key) {
            Some(guard) => guard,
            None => return Ok(self.coalesced_report(query_id)),
        };
        let sequence = self.next_sequence(query_id);

        // Freshness probe, when the service has one. A failed probe keeps
        // the stored marker and falls through to the fetch path.
        let mut probed_marker = None;
        if self.executor.supports_probe() {
            match self
                .executor
                .probe(query_id.to_string(), variables.clone(), range.copied())
                .await
            {
                Ok(marker) => probed_marker = Some(marker),
                Err(err) => log::debug!("freshness probe failed for {}: {}", query_id, err),
            }
        }

        let report = match range {
            Some(range) => {
                self.run_partitioned(query_id, variables, *range, sequence, &probed_marker)
                    .await?
            }
            None => {
                self.run_unpartitioned(query_id, variables, sequence, &probed_marker)
                    .await?
            }
        };
        // Advance the stored marker only when every requested partition is
        // now fresh; after a partial run the old marker stands, so the next
        // probe still sees the change and retries the failed months.
        if report.missing_partitions == 0 {
            if let Some(marker) = probed_marker {
                self.cache.put_staleness(query_id, Some(marker));
            }
        }
        Ok(report)
    }

    /// True while no later execution for the same query has started.
    pub fn is_current(&self, report: &ExecutionReport) -> bool {
        self.sequences
            .lock()
            .expect("sequence map poisoned")
            .get(&report.query_id)
            .copied()
            .unwrap_or(0)
            == report.sequence
    }

    async fn run_unpartitioned(
        &self,
        query_id: &str,
        variables: &QueryVariables,
        sequence: u64,
        probed_marker: &Option<StalenessMarker>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let covered = !self
            .cache
            .cached_partitions(query_id, &[DEFAULT_PARTITION.to_string()])
            .is_empty();
        if covered && self.fresh_enough(query_id, probed_marker) {
            return Ok(ExecutionReport {
                query_id: query_id.to_string(),
                sequence,
                outcome: ExecutionOutcome::FromCache,
                data: self.cache.reconstruct(query_id, None, None),
                requested_partitions: 1,
                missing_partitions: 0,
            });
        }

        let shape = self
            .executor
            .fetch(query_id.to_string(), variables.clone(), None)
            .await?;
        self.cache.ensure_stores(query_id, &shape, None);
        for (store_key, rows) in shape {
            self.cache.write_entries(query_id, &store_key, rows);
        }
        Ok(ExecutionReport {
            query_id: query_id.to_string(),
            sequence,
            outcome: ExecutionOutcome::Fetched,
            data: self.cache.reconstruct(query_id, None, None),
            requested_partitions: 1,
            missing_partitions: 0,
        })
    }

    async fn run_partitioned(
        &self,
        query_id: &str,
        variables: &QueryVariables,
        range: MonthRange,
        sequence: u64,
        probed_marker: &Option<StalenessMarker>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let keys = range.keys();
        let cached = self.cache.cached_partitions(query_id, &keys);
        if cached.len() == keys.len() && self.fresh_enough(query_id, probed_marker) {
            return Ok(ExecutionReport {
                query_id: query_id.to_string(),
                sequence,
                outcome: ExecutionOutcome::FromCache,
                data: self.cache.reconstruct_partitions(query_id, &keys),
                requested_partitions: keys.len(),
                missing_partitions: 0,
            });
        }

        // A moved marker invalidates every cached month of the range, not
        // just the absent ones; cached rows predate the change.
        let to_fetch: Vec<YearMonth> = if self.marker_changed(query_id, probed_marker) {
            range.months_recent_first()
        } else {
            range
                .months_recent_first()
                .into_iter()
                .filter(|m| !cached.contains(&m.key()))
                .collect()
        };

        let mut jobs = tokio::task::JoinSet::new();
        for month in &to_fetch {
            let month = *month;
            let executor = self.executor.clone();
            let cache = Arc::clone(&self.cache);
            let query = query_id.to_string();
            let vars = variables.clone();
            jobs.spawn(async move {
                match executor
                    .fetch(query.clone(), vars, Some(MonthRange::single(month)))
                    .await
                {
                    Ok(shape) => {
                        // Persist immediately: partial completion becomes
                        // visible in the cache before the union read.
                        let partition = month.key();
                        cache.ensure_stores(&query, &shape, Some(&partition));
                        for (store_key, rows) in shape {
                            let store =
                                LocalResultCache::store_name(Some(&partition), &store_key);
                            cache.write_entries(&query, &store, rows);
                        }
                        Ok(())
                    }
                    Err(err) => {
                        log::warn!("fetch failed for {} {}: {}", query, month, err);
                        Err(err)
                    }
                }
            });
        }

        let mut fetched = 0usize;
        let mut failed = 0usize;
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Ok(())) => fetched += 1,
                Ok(Err(_)) => failed += 1,
                Err(err) => {
                    log::warn!("fetch task for {} panicked: {}", query_id, err);
                    failed += 1;
                }
            }
        }

        if fetched == 0 && cached.is_empty() && !to_fetch.is_empty() {
            return Err(ExecutionError::AllPartitionsFailed {
                query_id: query_id.to_string(),
                requested: keys.len(),
            });
        }

        Ok(ExecutionReport {
            query_id: query_id.to_string(),
            sequence,
            outcome: if failed > 0 {
                ExecutionOutcome::Partial
            } else if to_fetch.is_empty() {
                ExecutionOutcome::FromCache
            } else {
                ExecutionOutcome::Fetched
            },
            data: self.cache.reconstruct_partitions(query_id, &keys),
            requested_partitions: keys.len(),
            missing_partitions: failed,
        })
    }

    /// Without a probe the cache is trusted on coverage alone; with one,
    /// only an unchanged marker lets coverage stand in for a fetch.
    fn fresh_enough(&self, query_id: &str, probed_marker: &Option<StalenessMarker>) -> bool {
        match probed_marker {
            None if !self.executor.supports_probe() => true,
            None => false,
            Some(marker) => self.cache.get_staleness(query_id).as_ref() == Some(marker),
        }
    }

    /// True only when the probe answered and disagrees with the stored
    /// marker. A failed probe keeps last-known-good cached data usable.
    fn marker_changed(&self, query_id: &str, probed_marker: &Option<StalenessMarker>) -> bool {
        matches!(
            probed_marker,
            Some(marker) if self.cache.get_staleness(query_id).as_ref() != Some(marker)
        )
    }

    fn try_acquire(&self, key: String) -> Option<FlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(FlightGuard {
            coordinator: self,
            key,
        })
    }

    fn next_sequence(&self, query_id: &str) -> u64 {
        let mut sequences = self.sequences.lock().expect("sequence map poisoned");
        let seq = sequences.entry(query_id.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn coalesced_report(&self, query_id: &str) -> ExecutionReport {
        let sequence = self
            .sequences
            .lock()
            .expect("sequence map poisoned")
            .get(query_id)
            .copied()
            .unwrap_or(0);
        ExecutionReport {
            query_id: query_id.to_string(),
            sequence,
            outcome: ExecutionOutcome::Coalesced,
            data: ResultShape::new(),
            requested_partitions: 0,
            missing_partitions: 0,
        }
    }
}

fn execution_key(
    query_id: &str,
    variables: &QueryVariables,
    range: Option<&MonthRange>,
) -> String {
    // BTreeMap keeps variables name-ordered, so equal bindings serialize
    // identically regardless of insertion order.
    let vars = serde_json::to_string(variables).unwrap_or_default();
    let range = range
        .map(|r| format!("{}..{}", r.start, r.end))
        .unwrap_or_default();
    format!("{}|{}|{}", query_id, vars, range)
}
