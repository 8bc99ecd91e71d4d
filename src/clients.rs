use std::time::Duration;

use crate::config::Config;
use reqwest::Client as HttpClient;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Creates and returns a new database connection pool.
pub async fn setup_db_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url())
        .await
}

/// Creates the HTTP client used by the email transport. Its own timeout is a
/// backstop behind the per-attempt deadline.
pub fn setup_http_client(config: &Config) -> Result<HttpClient, reqwest::Error> {
    HttpClient::builder()
        .timeout(Duration::from_millis(config.default_timeout_ms.saturating_mul(2)))
        .build()
}
