//! Task record storage.
//!
//! [`JobStore`] is the seam between the orchestration core and wherever task
//! records live. Every mutation goes through [`JobStore::apply_transition`],
//! an atomic read-modify-write of a single record, so concurrent writers to
//! different tasks never contend and readers always see a whole record.
//!
//! [`InMemoryJobStore`] keeps records in a sharded map. Writes lock only the
//! shard holding the record, and only for the duration of the in-memory
//! transition.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::record::{JobId, JobRecord, JobStatus, Transition};

/// Largest page size honoured by [`JobFilter`].
pub const MAX_PAGE_SIZE: usize = 100;

/// Filter and pagination options for listing tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub platform: Option<String>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            platform: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl JobFilter {
    fn matches(&self, record: &JobRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self
                .platform
                .as_deref()
                .map_or(true, |p| record.platform == p)
    }

    fn normalized(&self) -> (usize, usize) {
        (self.page.max(1), self.page_size.clamp(1, MAX_PAGE_SIZE))
    }
}

/// One page of task records, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub items: Vec<JobRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// Storage for task records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record and return its id.
    async fn create(&self, record: JobRecord) -> Result<JobId>;

    /// Fetch a snapshot of one record.
    async fn get(&self, id: JobId) -> Result<JobRecord>;

    /// Atomically apply `transition` to one record and return the new state.
    async fn apply_transition(&self, id: JobId, transition: Transition) -> Result<JobRecord>;

    /// List records matching `filter`, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<JobPage>;

    /// Delete a record. Only terminal records may be removed.
    async fn remove(&self, id: JobId) -> Result<JobRecord>;
}

/// Process-local [`JobStore`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: DashMap<JobId, JobRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<JobId> {
        let id = record.id;
        self.records.insert(id, record);
        debug!(job_id = %id, "task record created");
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<JobRecord> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(OrchestratorError::NotFound(id))
    }

    async fn apply_transition(&self, id: JobId, transition: Transition) -> Result<JobRecord> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(OrchestratorError::NotFound(id))?;
        entry.apply(transition)?;
        Ok(entry.value().clone())
    }

    async fn list(&self, filter: &JobFilter) -> Result<JobPage> {
        let (page, page_size) = filter.normalized();

        let mut matching: Vec<JobRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(JobPage {
            items,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        })
    }

    async fn remove(&self, id: JobId) -> Result<JobRecord> {
        let removed = self
            .records
            .remove_if(&id, |_, record| record.is_terminal())
            .map(|(_, record)| record);

        match removed {
            Some(record) => {
                debug!(job_id = %id, "task record removed");
                Ok(record)
            }
            None => {
                let status = self.get(id).await?.status;
                Err(OrchestratorError::invalid_state(id, status, "delete"))
            }
        }
    }
}
