use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::database::StoreError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const MAX_ACTIVE_DEVICES: usize = 3;

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("license payload could not be decoded")]
    InvalidPayload,
    #[error("license key not found")]
    NotFound,
    #[error("device limit reached")]
    DeviceLimit,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reversible transform applied to license keys and request payloads.
/// Clients hold the same key material, so the output must be stable for a
/// given input: fixed IV, PKCS7 padding, base64 text.
#[derive(Clone)]
pub struct LicenseCipher {
    key: [u8; 32],
    iv: [u8; 16],
}

impl LicenseCipher {
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        BASE64.encode(ciphertext)
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, LicenseError> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|_| LicenseError::InvalidPayload)?;
        let plain = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&raw)
            .map_err(|_| LicenseError::InvalidPayload)?;
        String::from_utf8(plain).map_err(|_| LicenseError::InvalidPayload)
    }
}

/// Decrypted request body: the license key is carried in its encrypted
/// form and matched against the stored encrypted value directly.
#[derive(Debug, Deserialize)]
pub struct LicensePayload {
    pub license_key: String,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct IssuedLicense {
    pub plain_key: String,
    pub encrypted_license: String,
}

#[derive(Clone)]
pub struct LicenseVault {
    pool: PgPool,
    cipher: LicenseCipher,
}

impl LicenseVault {
    pub fn new(pool: PgPool, cipher: LicenseCipher) -> Self {
        Self { pool, cipher }
    }

    pub async fn generate(&self) -> Result<IssuedLicense, LicenseError> {
        let token = Uuid::new_v4().simple().to_string();
        let plain_key = token[..6].to_uppercase();
        let encrypted_license = self.cipher.encrypt(&plain_key);

        sqlx::query("INSERT INTO license_keys (plain_key, license_key) VALUES ($1, $2)")
            .bind(&plain_key)
            .bind(&encrypted_license)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(IssuedLicense {
            plain_key,
            encrypted_license,
        })
    }

    pub async fn verify(&self, payload: &str) -> Result<(), LicenseError> {
        let request = self.open_payload(payload)?;

        let row = sqlx::query("SELECT active_devices FROM license_keys WHERE license_key = $1")
            .bind(&request.license_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let Some(row) = row else {
            self.log_event(
                &request.device_id,
                "License verification failed: encrypted key mismatch",
                None,
            )
            .await?;
            return Err(LicenseError::NotFound);
        };
        let active_devices: Vec<String> =
            row.try_get("active_devices").map_err(StoreError::from)?;

        if !active_devices.iter().any(|device| device == &request.device_id) {
            if active_devices.len() >= MAX_ACTIVE_DEVICES {
                return Err(LicenseError::DeviceLimit);
            }
            sqlx::query(
                r#"
                UPDATE license_keys
                SET active_devices = array_append(active_devices, $2)
                WHERE license_key = $1
                "#,
            )
            .bind(&request.license_key)
            .bind(&request.device_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        }

        self.log_event(
            &request.device_id,
            "License verified",
            Some(json!({ "action": "verified" })),
        )
        .await?;
        Ok(())
    }

    pub async fn devices(&self, payload: &str) -> Result<Vec<String>, LicenseError> {
        let request = self.open_payload(payload)?;
        let row = sqlx::query("SELECT active_devices FROM license_keys WHERE license_key = $1")
            .bind(&request.license_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        let Some(row) = row else {
            return Err(LicenseError::NotFound);
        };
        Ok(row.try_get("active_devices").map_err(StoreError::from)?)
    }

    pub async fn remove_device(&self, payload: &str) -> Result<(), LicenseError> {
        let request = self.open_payload(payload)?;
        sqlx::query(
            r#"
            UPDATE license_keys
            SET active_devices = array_remove(active_devices, $2)
            WHERE license_key = $1
            "#,
        )
        .bind(&request.license_key)
        .bind(&request.device_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        self.log_event(&request.device_id, "Device unlinked", None).await?;
        Ok(())
    }

    fn open_payload(&self, payload: &str) -> Result<LicensePayload, LicenseError> {
        let plain = self.cipher.decrypt(payload)?;
        serde_json::from_str(&plain).map_err(|_| LicenseError::InvalidPayload)
    }

    async fn log_event(
        &self,
        device_id: &str,
        event: &str,
        details: Option<serde_json::Value>,
    ) -> Result<(), LicenseError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (device_id, event, details, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(device_id)
        .bind(event)
        .bind(details)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> LicenseCipher {
        LicenseCipher::new(*b"YourSuperSecretKey12345678901234", *b"FixedIV123456789")
    }

    #[test]
    fn cipher_round_trips() {
        let cipher = cipher();
        let encrypted = cipher.encrypt("A1B2C3");
        assert_ne!(encrypted, "A1B2C3");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "A1B2C3");
    }

    #[test]
    fn cipher_is_deterministic_for_a_fixed_iv() {
        let cipher = cipher();
        assert_eq!(cipher.encrypt("A1B2C3"), cipher.encrypt("A1B2C3"));
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let cipher = cipher();
        assert!(matches!(
            cipher.decrypt("not base64 at all!"),
            Err(LicenseError::InvalidPayload)
        ));
        // Valid base64 that is not a whole number of cipher blocks.
        assert!(matches!(
            cipher.decrypt(&BASE64.encode(b"short")),
            Err(LicenseError::InvalidPayload)
        ));
    }

    #[test]
    fn payload_round_trips_through_the_cipher() {
        let cipher = cipher();
        let encoded = cipher.encrypt(r#"{"license_key": "enc-key", "device_id": "dev-1"}"#);
        let decoded: LicensePayload =
            serde_json::from_str(&cipher.decrypt(&encoded).unwrap()).unwrap();
        assert_eq!(decoded.license_key, "enc-key");
        assert_eq!(decoded.device_id, "dev-1");
    }
}
