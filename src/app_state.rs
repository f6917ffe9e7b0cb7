use anyhow::Context;
use sqlx::PgPool;

use crate::{
    ads::AdsConfigResolver,
    app_params::AppParameterStore,
    cache::CacheHandle,
    complaints::ComplaintStore,
    config::Config,
    database::create_postgres_pool,
    devices::DeviceRegistry,
    licenses::{LicenseCipher, LicenseVault},
    stations::StationQueryEngine,
};

/// Process-wide context: the store pool, the optional cache handle, and the
/// components built on top of them. Constructed once at startup and torn
/// down through `shutdown`.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub postgres: PgPool,
    pub cache: CacheHandle,
    pub stations: StationQueryEngine,
    pub ads: AdsConfigResolver,
    pub complaints: ComplaintStore,
    pub devices: DeviceRegistry,
    pub licenses: LicenseVault,
    pub app_params: AppParameterStore,
}

impl AppState {
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let postgres = create_postgres_pool(&config.postgres)
            .await
            .context("failed to connect to postgres")?;
        // A cache that cannot be set up leaves a disabled handle behind;
        // requests then always take the store path.
        let cache = CacheHandle::connect(config.redis_url.as_deref(), config.cache.op_timeout_ms);

        let stations = StationQueryEngine::new(
            postgres.clone(),
            cache.clone(),
            config.cache.stations_key.clone(),
            config.cache.stations_ttl_seconds,
        );
        let ads = AdsConfigResolver::new(
            postgres.clone(),
            cache.clone(),
            config.cache.ads_ttl_seconds,
        );
        let complaints = ComplaintStore::new(postgres.clone());
        let devices = DeviceRegistry::new(postgres.clone());
        let cipher = LicenseCipher::new(config.license.secret_key, config.license.iv);
        let licenses = LicenseVault::new(postgres.clone(), cipher);
        let app_params = AppParameterStore::new(postgres.clone());

        Ok(Self {
            config,
            postgres,
            cache,
            stations,
            ads,
            complaints,
            devices,
            licenses,
            app_params,
        })
    }

    pub async fn shutdown(&self) {
        self.postgres.close().await;
    }

    pub async fn ping_postgres(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.postgres).await?;
        Ok(())
    }

    pub async fn ping_cache(&self) -> anyhow::Result<()> {
        self.cache.ping().await
    }
}
