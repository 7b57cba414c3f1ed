//! Session persistence for shared state
//!
//! The engine itself never owns durable storage; callers seed a run from a
//! stored session snapshot and persist the final state afterwards.
//! In-memory by default, Postgres when a database URL is configured.

use crate::state::SharedState;
use crate::Result;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Trait for storing session state snapshots by id
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session_id: Uuid, state: &SharedState) -> Result<()>;
    async fn load(&self, session_id: Uuid) -> Result<Option<SharedState>>;
    async fn delete(&self, session_id: Uuid) -> Result<()>;
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SharedState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session_id: Uuid, state: &SharedState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, state.clone());
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SharedState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session_id);
        Ok(())
    }
}

/// Postgres-backed session store, schema created lazily on first use
pub struct PostgresSessionStore {
    pool: sqlx::PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresSessionStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS advisor_sessions (
                      session_id UUID PRIMARY KEY,
                      state JSONB NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                crate::error::OrchestrationError::SessionStore(format!(
                    "Failed to initialize session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn save(&self, session_id: Uuid, state: &SharedState) -> Result<()> {
        self.ensure_schema().await?;

        let payload = serde_json::to_value(state)?;

        sqlx::query(
            r#"
            INSERT INTO advisor_sessions (session_id, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SharedState>> {
        self.ensure_schema().await?;

        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT state FROM advisor_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM advisor_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Pick a session store from the environment.
///
/// Falls back to in-memory when no database URL is configured or the pool
/// cannot be constructed.
pub fn session_store_from_env() -> Arc<dyn SessionStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&url)
        {
            Ok(pool) => {
                info!("Session store: Postgres");
                return Arc::new(PostgresSessionStore::new(pool));
            }
            Err(e) => {
                warn!("Failed to create Postgres pool, using in-memory sessions: {}", e);
            }
        }
    }

    info!("Session store: in-memory");
    Arc::new(InMemorySessionStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemorySessionStore::new();
        let session_id = Uuid::new_v4();

        let mut state = SharedState::new();
        state.set("user_preferences", json!({"risk_tolerance": "medium"}));

        assert_ok!(store.save(session_id, &state).await);

        let loaded = store.load(session_id).await.unwrap().unwrap();
        assert_eq!(
            loaded.get("user_preferences"),
            Some(&json!({"risk_tolerance": "medium"}))
        );
    }

    #[tokio::test]
    async fn test_missing_session_loads_none() {
        let store = InMemorySessionStore::new();
        let loaded = store.load(Uuid::new_v4()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_session() {
        let store = InMemorySessionStore::new();
        let session_id = Uuid::new_v4();

        store.save(session_id, &SharedState::new()).await.unwrap();
        store.delete(session_id).await.unwrap();

        assert!(store.load(session_id).await.unwrap().is_none());
    }
}
