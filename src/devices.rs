use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::database::StoreError;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRegistration {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub platform: Option<String>,
}

/// Client-reported activity event; `timestamp` is the client's own clock
/// and is stored verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityEntry {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub event: String,
    pub details: Option<Value>,
    pub timestamp: String,
}

#[derive(Debug, PartialEq)]
pub enum RegistrationOutcome {
    Registered,
    AlreadyRegistered,
}

#[derive(Clone)]
pub struct DeviceRegistry {
    pool: PgPool,
}

impl DeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<RegistrationOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (device_id, platform)
            VALUES ($1, $2)
            ON CONFLICT (device_id) DO NOTHING
            "#,
        )
        .bind(&registration.device_id)
        .bind(&registration.platform)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            RegistrationOutcome::AlreadyRegistered
        } else {
            RegistrationOutcome::Registered
        })
    }

    pub async fn record_activity(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (device_id, event, details, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&entry.device_id)
        .bind(&entry.event)
        .bind(&entry.details)
        .bind(&entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_accepts_camel_case_device_ids() {
        let registration: DeviceRegistration =
            serde_json::from_str(r#"{"deviceId": "abc-123", "platform": "android"}"#).unwrap();
        assert_eq!(registration.device_id, "abc-123");
        assert_eq!(registration.platform.as_deref(), Some("android"));
    }

    #[test]
    fn activity_entries_allow_missing_details() {
        let entry: ActivityEntry = serde_json::from_str(
            r#"{"deviceId": "abc-123", "event": "app_open", "timestamp": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(entry.details.is_none());
        assert_eq!(entry.event, "app_open");
    }
}
