//! FILENAME: query-runtime/src/service.rs
//! The remote query service contract. Consumed here, implemented by the
//! transport layer (or by mocks in tests).

use std::collections::BTreeMap;
use std::future::Future;

use result_cache::ResultShape;
use table_model::Value;

use crate::error::FetchError;
use crate::months::MonthRange;

/// Query variables, keyed and ordered by name so two calls with the same
/// bindings normalize to the same execution key.
pub type QueryVariables = BTreeMap<String, Value>;

/// Opaque freshness marker (typically the dataset's updatedAt). Compared
/// by value only.
pub type StalenessMarker = Value;

pub trait RemoteQueryService: Send + Sync + 'static {
    /// Full execution: returns the result shape (logical key -> rows) for
    /// the given bounds, or the whole dataset when bounds are absent.
    fn execute(
        &self,
        query_id: &str,
        variables: &QueryVariables,
        bounds: Option<&MonthRange>,
    ) -> impl Future<Output = Result<ResultShape, FetchError>> + Send;

    /// Lightweight freshness probe, cheaper than a full `execute`. Only
    /// called when `supports_index_probe` is true.
    fn execute_index(
        &self,
        query_id: &str,
        variables: &QueryVariables,
        bounds: Option<&MonthRange>,
    ) -> impl Future<Output = Result<StalenessMarker, FetchError>> + Send;

    /// Services without a cheap probe keep the default; the coordinator
    /// then skips fetches on cache coverage alone.
    fn supports_index_probe(&self) -> bool {
        false
    }
}
