//! Database query adapter. Rows come back as JSON objects.

use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;

use crate::config::secrets::{ExposeSecret, SecretString, masked_url};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSource {
    pub connection_url: SecretString,
    /// A single read-only `SELECT` or `WITH` statement.
    pub query: String,
}

impl DatabaseSource {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.connection_url.expose_secret().trim().is_empty() {
            return Err(Error::Validation("dataSource.connectionUrl is required".into()));
        }
        let query = self.statement();
        let head = query
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if head != "select" && head != "with" {
            return Err(Error::Validation(
                "dataSource.query must be a SELECT or WITH statement".into(),
            ));
        }
        if query.contains(';') {
            return Err(Error::Validation(
                "dataSource.query must be a single statement".into(),
            ));
        }
        Ok(())
    }

    fn statement(&self) -> &str {
        self.query.trim().trim_end_matches(';').trim_end()
    }
}

pub(crate) async fn fetch(source: &DatabaseSource) -> Result<Value> {
    tracing::debug!(database = %masked_url(&source.connection_url), "running data source query");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(source.connection_url.expose_secret())
        .await?;

    let rows: std::result::Result<Vec<Value>, sqlx::Error> = sqlx::query_scalar(&format!(
        "SELECT row_to_json(t)::jsonb FROM ({}) t",
        source.statement()
    ))
    .fetch_all(&pool)
    .await;
    pool.close().await;

    Ok(Value::Array(rows?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(query: &str) -> DatabaseSource {
        DatabaseSource {
            connection_url: SecretString::from("postgres://localhost/db"),
            query: query.to_string(),
        }
    }

    #[test]
    fn only_single_read_statements_pass() {
        assert!(source("SELECT * FROM orders;").validate().is_ok());
        assert!(source("with x as (select 1) select * from x").validate().is_ok());
        assert!(source("DELETE FROM orders").validate().is_err());
        assert!(source("SELECT 1; DROP TABLE orders").validate().is_err());
    }
}
