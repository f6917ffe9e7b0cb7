use serde_json::{Map, Value};
use sqlx::{PgPool, Row};

use crate::database::StoreError;

/// Read-only key/value parameters consumed by the client at startup.
#[derive(Clone)]
pub struct AppParameterStore {
    pool: PgPool,
}

impl AppParameterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_all(&self) -> Result<Map<String, Value>, StoreError> {
        let rows = sqlx::query("SELECT parameter_code, value FROM app_parameters")
            .fetch_all(&self.pool)
            .await?;

        let mut params = Map::new();
        for row in rows {
            let code: String = row.try_get("parameter_code")?;
            let value: Option<Value> = row.try_get("value")?;
            params.insert(code, value.unwrap_or(Value::Null));
        }
        Ok(params)
    }
}
