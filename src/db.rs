use sqlx::{postgres::PgPoolOptions, PgPool};

/// Owns the connection pool for the lifetime of the process.
///
/// Opened once at startup, handed to request handlers through `AppState`,
/// and closed explicitly on shutdown.
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}
