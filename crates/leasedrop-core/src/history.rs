//! Persistence seam for retrieval history.

use crate::error::Result;
use crate::query::QueryInfo;
use crate::result::QueryResult;
use async_trait::async_trait;

/// Append-only record of every retrieval run.
///
/// Implementations must tolerate concurrent appends from independent
/// retrievals.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record one finished retrieval and return its identifier.
    async fn append(&self, result: &QueryResult) -> Result<i64>;

    /// All recorded queries, newest first.
    async fn list_queries(&self) -> Result<Vec<QueryInfo>>;

    /// Full detail of one recorded query.
    async fn get_query_detail(&self, id: i64) -> Result<Option<QueryResult>>;
}
