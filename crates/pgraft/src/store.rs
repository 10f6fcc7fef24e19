//! The storage seam the executor drives.
//!
//! Two implementations ship with the crate: [`tokio_postgres::Client`]
//! (see the `pg` module) and the in-memory store used by the test suite.

use crate::error::GraftResult;
use crate::value::Value;

/// A database the executor can open a transaction against.
pub trait GraphStore: Send {
    type Tx<'a>: GraphTransaction
    where
        Self: 'a;

    fn begin(&mut self) -> impl std::future::Future<Output = GraftResult<Self::Tx<'_>>> + Send;
}

/// One transactional unit of work. All writes of a graph insertion go
/// through a single transaction; committing or rolling back consumes it.
pub trait GraphTransaction: Send {
    /// Insert `rows` into `table`, returning each row's key in order.
    ///
    /// Every row carries one value per entry of `columns`. With a
    /// `key_column` the generated keys come back; without one (join rows)
    /// nothing is returned and the result is empty.
    fn insert_returning(
        &mut self,
        table: &str,
        key_column: Option<&str>,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> impl std::future::Future<Output = GraftResult<Vec<Value>>> + Send;

    /// Set columns on one existing row identified by its key. Matching no
    /// row is an error.
    fn update_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &Value,
        columns: &[String],
        values: Vec<Value>,
    ) -> impl std::future::Future<Output = GraftResult<()>> + Send;

    fn commit(self) -> impl std::future::Future<Output = GraftResult<()>> + Send;

    fn rollback(self) -> impl std::future::Future<Output = GraftResult<()>> + Send;
}
