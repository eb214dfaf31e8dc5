//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! winback-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `WINBACK_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`)
//!
//! Migration files live in `crates/engine/migrations/` and are embedded at
//! compile time, so the binary runs them without any files on disk.

use sqlx::PgPool;

/// Migration errors.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run engine database migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails,
/// or a migration fails to apply.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("WINBACK_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| MigrationError::MissingEnvVar("WINBACK_DATABASE_URL"))?;

    tracing::info!("Connecting to engine database...");
    let pool = PgPool::connect(&database_url).await?;

    tracing::info!("Running engine migrations...");
    sqlx::migrate!("../engine/migrations").run(&pool).await?;

    tracing::info!("Engine migrations complete!");
    Ok(())
}
