//! Query result accumulation.
//!
//! The engine owns a [`ResultGroup`] while an operation is in flight, feeds
//! it column metadata, rows, notices and completion tags as they arrive, and
//! hands it to the operation's waiter on completion (or attaches the partial
//! contents to the error on failure).

use crate::error::ServerError;
use crate::protocol::backend::Column;
use crate::protocol::types::Oid;

/// Result of a single statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Result column metadata, empty until a RowDescription arrives (or, for
    /// prepared statements, attached from describe-time metadata)
    pub columns: Vec<Column>,
    /// Parameter type OIDs, filled by DescribeStatement
    pub parameter_oids: Vec<Oid>,
    /// Raw row values; `None` entries are SQL NULL
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    /// Notices the server raised while producing this result
    pub notices: Vec<ServerError>,
    /// Completion tag (e.g. "SELECT 2"); a result is finalized once set
    pub tag: Option<String>,
    /// Row count parsed from the tail of the completion tag
    pub rows_affected: Option<u64>,
    /// True when Execute stopped at its row limit (PortalSuspended)
    pub suspended: bool,
}

impl QueryResult {
    /// A result is finalized once its completion tag is assigned.
    pub fn is_finished(&self) -> bool {
        self.tag.is_some()
    }

    /// Assign the completion tag and parse the trailing row count out of it.
    pub(crate) fn finish(&mut self, tag: &str) {
        self.rows_affected = parse_rows_affected(tag);
        self.tag = Some(tag.to_string());
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows were produced.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A value as text, if the cell exists and is neither NULL nor invalid
    /// UTF-8.
    pub fn text(&self, row: usize, col: usize) -> Option<&str> {
        let value = self.rows.get(row)?.get(col)?.as_deref()?;
        std::str::from_utf8(value).ok()
    }
}

/// Parse the trailing row count from a completion tag.
///
/// "DELETE 10" → 10, "INSERT 0 1" → 1, bare "SELECT" → nothing.
fn parse_rows_affected(tag: &str) -> Option<u64> {
    let (_, count) = tag.rsplit_once(' ')?;
    count.parse().ok()
}

/// Ordered results of one submission.
///
/// A Simple Query may carry multiple semicolon-separated statements; each
/// produces its own [`QueryResult`], in order. At least one result always
/// exists, and every result except the last may be finalized.
#[derive(Debug, Clone)]
pub struct ResultGroup {
    results: Vec<QueryResult>,
}

impl ResultGroup {
    pub(crate) fn new() -> Self {
        Self {
            results: vec![QueryResult::default()],
        }
    }

    /// The result currently accumulating. If the last result is already
    /// finalized, a fresh one is pushed first.
    fn current_mut(&mut self) -> &mut QueryResult {
        if self.results.last().is_some_and(QueryResult::is_finished) {
            self.results.push(QueryResult::default());
        }
        self.results.last_mut().expect("group is never empty")
    }

    pub(crate) fn set_columns(&mut self, columns: Vec<Column>) {
        self.current_mut().columns = columns;
    }

    pub(crate) fn set_parameter_oids(&mut self, oids: Vec<Oid>) {
        self.current_mut().parameter_oids = oids;
    }

    pub(crate) fn append_row(&mut self, values: Vec<Option<Vec<u8>>>) {
        self.current_mut().rows.push(values);
    }

    /// Notices attach to the statement that produced them: the last result,
    /// finalized or not.
    pub(crate) fn add_notice(&mut self, notice: ServerError) {
        self.results
            .last_mut()
            .expect("group is never empty")
            .notices
            .push(notice);
    }

    pub(crate) fn finish_current(&mut self, tag: &str) {
        self.current_mut().finish(tag);
    }

    pub(crate) fn mark_suspended(&mut self) {
        self.current_mut().suspended = true;
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Always false; a group holds at least one result.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// All results, in statement order.
    pub fn results(&self) -> &[QueryResult] {
        &self.results
    }

    /// A result by statement index.
    pub fn get(&self, index: usize) -> Option<&QueryResult> {
        self.results.get(index)
    }

    /// Consume the group, keeping only the first result.
    ///
    /// Extended-query operations produce exactly one.
    pub fn into_single(self) -> QueryResult {
        self.results
            .into_iter()
            .next()
            .expect("group is never empty")
    }
}

impl Default for ResultGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for ResultGroup {
    type Item = QueryResult;
    type IntoIter = std::vec::IntoIter<QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_row_count() {
        let mut result = QueryResult::default();
        result.finish("DELETE 10");
        assert_eq!(result.rows_affected, Some(10));
        assert_eq!(result.tag.as_deref(), Some("DELETE 10"));

        let mut result = QueryResult::default();
        result.finish("SELECT");
        assert_eq!(result.rows_affected, None);

        let mut result = QueryResult::default();
        result.finish("INSERT 0 1");
        assert_eq!(result.rows_affected, Some(1));
    }

    #[test]
    fn test_group_starts_fresh_result_after_tag() {
        let mut group = ResultGroup::new();
        group.append_row(vec![Some(b"1".to_vec())]);
        group.finish_current("SELECT 1");
        group.append_row(vec![Some(b"2".to_vec())]);
        group.finish_current("SELECT 1");

        assert_eq!(group.len(), 2);
        assert_eq!(group.get(0).unwrap().text(0, 0), Some("1"));
        assert_eq!(group.get(1).unwrap().text(0, 0), Some("2"));
        assert!(group.results().iter().all(QueryResult::is_finished));
    }

    #[test]
    fn test_back_to_back_tags() {
        let mut group = ResultGroup::new();
        group.finish_current("CREATE TABLE");
        group.finish_current("INSERT 0 1");

        assert_eq!(group.len(), 2);
        assert!(group.get(0).unwrap().is_empty());
        assert_eq!(group.get(1).unwrap().rows_affected, Some(1));
    }
}
