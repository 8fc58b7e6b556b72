//! Demo crawl used by the HTTP API until real platform crawlers are wired in.
//!
//! Walks progress from 0 to 100 in steps of 10, sleeping `step_delay` per
//! step. Steps strictly between 0 and 100 collect one item, or two on
//! multiples of 20.

use std::time::Duration;

use async_trait::async_trait;
use task_orchestrator::{Increment, JobId, ProgressState, UnitOfWork};
use tracing::debug;

use crate::common::Platform;

/// Progress added per increment.
pub const PROGRESS_STEP: u8 = 10;

pub struct SimulatedCrawl {
    platform: Platform,
    keyword: Option<String>,
    step_delay: Duration,
}

impl SimulatedCrawl {
    pub fn new(platform: Platform, step_delay: Duration) -> Self {
        Self {
            platform,
            keyword: None,
            step_delay,
        }
    }

    pub fn with_keyword(mut self, keyword: Option<String>) -> Self {
        self.keyword = keyword;
        self
    }

    /// Items collected on the step that reaches `progress`.
    pub fn items_at(progress: u8) -> u64 {
        match progress {
            0 | 100..=u8::MAX => 0,
            p if p % 20 == 0 => 2,
            _ => 1,
        }
    }

    /// Items a full run collects.
    pub fn total_items() -> u64 {
        (0..=100)
            .step_by(PROGRESS_STEP as usize)
            .map(Self::items_at)
            .sum()
    }
}

#[async_trait]
impl UnitOfWork for SimulatedCrawl {
    async fn step(&mut self, job_id: JobId, prior: ProgressState) -> anyhow::Result<Increment> {
        tokio::time::sleep(self.step_delay).await;

        let progress = (prior.increments * PROGRESS_STEP as u64).min(100) as u8;
        let items_collected = prior.items_collected + Self::items_at(progress);

        debug!(
            job_id = %job_id,
            platform = %self.platform,
            keyword = self.keyword.as_deref().unwrap_or(""),
            progress,
            items_collected,
            "simulated crawl step"
        );

        Ok(Increment {
            progress,
            items_collected,
            has_more: progress < 100,
        })
    }
}
