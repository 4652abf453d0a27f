mod pool;

pub use pool::{create_memory_pool, create_pool};

use sqlx::SqlitePool;

/// Database handle shared across handlers
pub type Db = SqlitePool;

/// Apply the schema migrations bundled under `migrations/`
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations complete");
    Ok(())
}
