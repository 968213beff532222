//! Service configuration from environment variables

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::EngineConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub op_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("ALLOCATION_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("ALLOCATION_PORT must be a port number")?;
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let max_attempts = env::var("ALLOCATION_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("ALLOCATION_MAX_ATTEMPTS must be a number")?;
        let retry_backoff_ms = env::var("ALLOCATION_RETRY_BACKOFF_MS")
            .unwrap_or_else(|_| "25".to_string())
            .parse()
            .context("ALLOCATION_RETRY_BACKOFF_MS must be milliseconds")?;
        let op_deadline_ms = env::var("ALLOCATION_OP_DEADLINE_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .context("ALLOCATION_OP_DEADLINE_MS must be milliseconds")?;

        Ok(Self {
            port,
            database_url,
            max_attempts,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            op_deadline: Duration::from_millis(op_deadline_ms),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_attempts: self.max_attempts,
            retry_backoff: self.retry_backoff,
            op_deadline: Some(self.op_deadline),
        }
    }
}
