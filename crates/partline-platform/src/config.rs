use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub courier: CourierConfig,
}

#[derive(Clone, Debug)]
pub struct CourierConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl CourierConfig {
    fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("COURIER_BASE_URL").context("COURIER_BASE_URL is required")?;
        let api_key = std::env::var("COURIER_API_KEY").context("COURIER_API_KEY is required")?;
        let timeout_secs = std::env::var("COURIER_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            base_url,
            api_key,
            timeout_secs,
        })
    }
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let courier = CourierConfig::from_env()?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            courier,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
            courier: CourierConfig {
                base_url: String::new(),
                api_key: String::new(),
                timeout_secs: 10,
            },
        })
    }
}
