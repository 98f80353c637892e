//! Diesel async connection factory for SQLite.
//!
//! Uses diesel-async's SyncConnectionWrapper to provide an async interface
//! for SQLite. Since SQLite connections are lightweight, we create new
//! connections per request rather than pooling.

use std::path::Path;
use std::time::Duration;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::util::to_diesel_error;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection using SyncConnectionWrapper.
pub type AsyncSqliteConnection = SyncConnectionWrapper<SqliteConnection>;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A simple async connection factory for SQLite.
///
/// Several workers may write to the same file, so every connection is
/// opened with a busy timeout instead of failing fast on lock contention.
#[derive(Clone, Debug)]
pub struct AsyncSqlitePool {
    database_url: String,
}

impl AsyncSqlitePool {
    pub fn new(database_url: &str) -> Self {
        // Strip sqlite: prefix if present for diesel
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    pub fn from_path(db_path: &Path) -> Self {
        Self::new(&db_path.display().to_string())
    }

    /// Open a new connection.
    pub async fn get(&self) -> Result<AsyncSqliteConnection, DieselError> {
        let mut conn = AsyncSqliteConnection::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT.as_millis()))
            .execute(&mut conn)
            .await?;
        Ok(conn)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_sqlite_prefix() {
        assert_eq!(AsyncSqlitePool::new("sqlite:data.db").database_url(), "data.db");
        assert_eq!(AsyncSqlitePool::new("data.db").database_url(), "data.db");
    }
}
