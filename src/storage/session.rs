//! Connection lifecycle of the store.
//!
//! A session starts [`SessionState::Offline`]. Writes submitted while offline
//! are buffered in submission order; [`StoreSession::connect`] runs every
//! buffered write against the new pool, in order, before any later call is
//! served. Calls that need a result cannot be buffered and fail with
//! [`StoreError::Offline`] until the session is online.

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::SqlitePool;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

use super::StoreError;

/// A deferred write, run once a pool is available.
pub type StoreCommand =
    Box<dyn FnOnce(SqlitePool) -> BoxFuture<'static, Result<(), StoreError>> + Send>;

pub enum SessionState {
    Offline { pending: Vec<StoreCommand> },
    Online(SqlitePool),
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Offline { pending } => f
                .debug_struct("Offline")
                .field("pending", &pending.len())
                .finish(),
            SessionState::Online(_) => f.write_str("Online"),
        }
    }
}

#[derive(Debug)]
pub struct StoreSession {
    state: Mutex<SessionState>,
}

impl Default for StoreSession {
    fn default() -> Self {
        Self::offline()
    }
}

impl StoreSession {
    pub fn offline() -> Self {
        Self {
            state: Mutex::new(SessionState::Offline {
                pending: Vec::new(),
            }),
        }
    }

    /// Run `command` now if online, otherwise buffer it until [`connect`](Self::connect).
    pub async fn submit<F, Fut>(&self, command: F) -> Result<(), StoreError>
    where
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let pool = {
            let mut state = self.state.lock().await;
            match &mut *state {
                SessionState::Offline { pending } => {
                    pending.push(Box::new(move |pool| command(pool).boxed()));
                    debug!("Buffered store write ({} pending)", pending.len());
                    return Ok(());
                }
                SessionState::Online(pool) => pool.clone(),
            }
        };
        command(pool).await
    }

    /// Flush buffered writes against `pool` and go online.
    ///
    /// Returns the number of writes flushed. If a buffered write fails the
    /// session stays offline and the writes after it are discarded.
    pub async fn connect(&self, pool: SqlitePool) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let pending = match &mut *state {
            SessionState::Offline { pending } => std::mem::take(pending),
            SessionState::Online(_) => Vec::new(),
        };

        let flushed = pending.len();
        for command in pending {
            command(pool.clone()).await?;
        }

        *state = SessionState::Online(pool);
        debug!("Store session online after flushing {} writes", flushed);
        Ok(flushed)
    }

    /// Pool for calls that need a result.
    pub async fn pool(&self) -> Result<SqlitePool, StoreError> {
        match &*self.state.lock().await {
            SessionState::Online(pool) => Ok(pool.clone()),
            SessionState::Offline { .. } => Err(StoreError::Offline),
        }
    }

    pub async fn is_online(&self) -> bool {
        matches!(&*self.state.lock().await, SessionState::Online(_))
    }

    pub async fn pending(&self) -> usize {
        match &*self.state.lock().await {
            SessionState::Offline { pending } => pending.len(),
            SessionState::Online(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn insert(session: &StoreSession, value: i64) {
        session
            .submit(move |pool| async move {
                sqlx::query("INSERT INTO log (value) VALUES (?)")
                    .bind(value)
                    .execute(&pool)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_offline_writes_flush_in_order_on_connect() {
        let session = StoreSession::offline();
        session
            .submit(|pool| async move {
                sqlx::query("CREATE TABLE log (id INTEGER PRIMARY KEY, value INTEGER)")
                    .execute(&pool)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        insert(&session, 1).await;
        insert(&session, 2).await;

        assert!(!session.is_online().await);
        assert_eq!(session.pending().await, 3);

        assert_eq!(session.connect(memory_pool().await).await.unwrap(), 3);
        assert!(session.is_online().await);

        insert(&session, 3).await;

        let pool = session.pool().await.unwrap();
        let values: Vec<(i64,)> = sqlx::query_as("SELECT value FROM log ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(values, vec![(1,), (2,), (3,)]);
    }

    #[tokio::test]
    async fn test_queries_fail_while_offline() {
        let session = StoreSession::offline();
        assert!(matches!(session.pool().await, Err(StoreError::Offline)));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_session_offline() {
        let session = StoreSession::offline();
        insert(&session, 1).await;

        assert!(session.connect(memory_pool().await).await.is_err());
        assert!(!session.is_online().await);
        assert_eq!(session.pending().await, 0);
    }
}
