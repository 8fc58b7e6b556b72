use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use task_orchestrator::OrchestratorConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_concurrent_tasks: usize,
    pub pause_poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub ws_buffer_size: usize,
    pub cors_origins: Vec<String>,
    /// Simulated time spent on each crawl increment
    pub crawl_step_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8000)?,
            max_concurrent_tasks: parse_var("MAX_CONCURRENT_TASKS", 3)?,
            pause_poll_interval: Duration::from_millis(parse_var("TASK_PAUSE_POLL_MS", 250)?),
            shutdown_grace: Duration::from_secs(parse_var("SHUTDOWN_GRACE_SECS", 30)?),
            ws_buffer_size: parse_var("WS_BUFFER_SIZE", 256)?,
            cors_origins: parse_origins(
                &env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string()),
            ),
            crawl_step_delay: Duration::from_millis(parse_var("CRAWL_STEP_DELAY_MS", 2000)?),
        })
    }

    /// Core orchestrator settings derived from this config.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::with_max_concurrent(self.max_concurrent_tasks)
            .pause_poll_interval(self.pause_poll_interval)
            .shutdown_grace(self.shutdown_grace)
            .observer_buffer(self.ws_buffer_size)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_concurrent_tasks: 3,
            pause_poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(30),
            ws_buffer_size: 256,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            crawl_step_delay: Duration::from_secs(2),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
