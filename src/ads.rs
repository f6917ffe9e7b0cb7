use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::cache::{CacheHandle, CacheLookup};
use crate::database::StoreError;
use crate::logging::logger;

pub const GLOBAL_ADS_CACHE_KEY: &str = "ads_config:global";
const SCREEN_ADS_CACHE_PREFIX: &str = "ads_config:";

#[derive(Debug, Error)]
pub enum AdsError {
    #[error("ads configuration not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalAdsConfig {
    pub ads_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenAdsConfig {
    pub screen: String,
    pub ads_enabled: bool,
}

/// Cache-aside reader for the ad toggles. The global flag is authoritative:
/// when it is off, per-screen state is never consulted.
#[derive(Clone)]
pub struct AdsConfigResolver {
    pool: PgPool,
    cache: CacheHandle,
    ttl_seconds: u64,
}

impl AdsConfigResolver {
    pub fn new(pool: PgPool, cache: CacheHandle, ttl_seconds: u64) -> Self {
        Self {
            pool,
            cache,
            ttl_seconds,
        }
    }

    pub async fn global(&self) -> Result<GlobalAdsConfig, AdsError> {
        if let CacheLookup::Hit(raw) = self.cache.get(GLOBAL_ADS_CACHE_KEY).await {
            match serde_json::from_str::<GlobalAdsConfig>(&raw) {
                Ok(config) => return Ok(config),
                Err(error) => {
                    logger().warn(
                        "ads.cache_decode_error",
                        json!({ "key": GLOBAL_ADS_CACHE_KEY, "error": error.to_string() }),
                    );
                }
            }
        }

        let row = sqlx::query("SELECT ads_enabled FROM ads_config WHERE screen IS NULL LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        let Some(row) = row else {
            // An absent global record is a configuration defect, not an
            // empty result.
            return Err(AdsError::NotFound);
        };
        let config = GlobalAdsConfig {
            ads_enabled: row.try_get("ads_enabled").map_err(StoreError::from)?,
        };

        if let Ok(body) = serde_json::to_string(&config) {
            self.cache
                .put(GLOBAL_ADS_CACHE_KEY, &body, self.ttl_seconds)
                .await;
        }
        Ok(config)
    }

    pub async fn for_screen(&self, screen: &str) -> Result<ScreenAdsConfig, AdsError> {
        let global = self.global().await?;
        if !global.ads_enabled {
            // Globally disabled short-circuits every screen, including ones
            // with no stored record.
            return Ok(ScreenAdsConfig {
                screen: screen.to_string(),
                ads_enabled: false,
            });
        }

        let key = screen_cache_key(screen);
        if let CacheLookup::Hit(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<ScreenAdsConfig>(&raw) {
                Ok(config) => return Ok(config),
                Err(error) => {
                    logger().warn(
                        "ads.cache_decode_error",
                        json!({ "key": key, "error": error.to_string() }),
                    );
                }
            }
        }

        let row = sqlx::query("SELECT screen, ads_enabled FROM ads_config WHERE screen = $1")
            .bind(screen)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        let Some(row) = row else {
            return Err(AdsError::NotFound);
        };
        let config = ScreenAdsConfig {
            screen: row.try_get("screen").map_err(StoreError::from)?,
            ads_enabled: row.try_get("ads_enabled").map_err(StoreError::from)?,
        };

        if let Ok(body) = serde_json::to_string(&config) {
            self.cache.put(&key, &body, self.ttl_seconds).await;
        }
        Ok(config)
    }
}

fn screen_cache_key(screen: &str) -> String {
    format!("{SCREEN_ADS_CACHE_PREFIX}{screen}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_cache_keys_share_the_config_prefix() {
        assert_eq!(screen_cache_key("home"), "ads_config:home");
        assert_eq!(screen_cache_key("player"), "ads_config:player");
    }

    #[test]
    fn global_config_round_trips_through_the_cache_encoding() {
        let config = GlobalAdsConfig { ads_enabled: true };
        let body = serde_json::to_string(&config).unwrap();
        assert_eq!(body, "{\"ads_enabled\":true}");
        let decoded: GlobalAdsConfig = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn screen_config_round_trips_through_the_cache_encoding() {
        let config = ScreenAdsConfig {
            screen: "home".into(),
            ads_enabled: false,
        };
        let body = serde_json::to_string(&config).unwrap();
        let decoded: ScreenAdsConfig = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, config);
    }
}
