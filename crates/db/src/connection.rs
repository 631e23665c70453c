use std::time::Duration;

use frontdesk_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

/// Pool sizing and patience for one SQLite database, taken from the
/// application's database configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl ConnectionSettings {
    pub fn new(max_connections: u32, acquire_timeout_secs: u64) -> Self {
        Self { max_connections, acquire_timeout_secs }
    }

    /// Writers wait on WAL locks for the same window callers are willing to
    /// wait for a pooled connection.
    fn busy_timeout_ms(&self) -> u64 {
        self.acquire_timeout_secs.max(1).saturating_mul(1_000)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { max_connections: 5, acquire_timeout_secs: 30 }
    }
}

impl From<&DatabaseConfig> for ConnectionSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            acquire_timeout_secs: config.timeout_secs,
        }
    }
}

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, ConnectionSettings::default()).await
}

pub async fn connect_with_settings(
    database_url: &str,
    settings: ConnectionSettings,
) -> Result<DbPool, sqlx::Error> {
    // Every new connection to an in-memory database opens a distinct empty
    // database, so those pools are pinned to a single connection.
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        settings.max_connections.max(1)
    };
    let busy_timeout_ms = settings.busy_timeout_ms();

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use frontdesk_core::config::DatabaseConfig;

    use super::{connect_with_settings, ConnectionSettings};

    #[tokio::test]
    async fn pragmas_follow_the_connection_settings() {
        let pool = connect_with_settings("sqlite::memory:", ConnectionSettings::new(1, 7))
            .await
            .expect("connect");

        let busy_timeout: i64 =
            sqlx::query_scalar("PRAGMA busy_timeout").fetch_one(&pool).await.expect("pragma");
        let foreign_keys: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");

        assert_eq!(busy_timeout, 7_000);
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn in_memory_databases_are_pinned_to_one_connection() {
        let pool = connect_with_settings("sqlite::memory:", ConnectionSettings::new(4, 30))
            .await
            .expect("connect");

        assert_eq!(pool.options().get_max_connections(), 1);
    }

    #[test]
    fn settings_derive_from_the_database_config() {
        let config = DatabaseConfig {
            url: "sqlite://frontdesk.db".to_string(),
            max_connections: 12,
            timeout_secs: 9,
        };

        let settings = ConnectionSettings::from(&config);

        assert_eq!(settings.max_connections, 12);
        assert_eq!(settings.acquire_timeout_secs, 9);
    }
}
