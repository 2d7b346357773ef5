//! In-memory implementations of the storage ports

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpilot_core::{JobRepository, MailboxDirectory, WatchRepository};
use mailpilot_domain::{
    normalize_address, ConnectedMailbox, JobStatus, MailboxState, MailboxWatch, ProcessingJob,
    Result as DomainResult,
};

#[derive(Default)]
pub struct InMemoryWatchRepository {
    watches: Mutex<HashMap<String, MailboxWatch>>,
    states: Mutex<HashMap<String, MailboxState>>,
}

impl InMemoryWatchRepository {
    pub fn watch(&self, mailbox_id: &str) -> Option<MailboxWatch> {
        self.watches.lock().unwrap().get(mailbox_id).cloned()
    }

    /// Overwrite the cursor behind the registry's back, as a racing writer would.
    pub fn force_cursor(&self, mailbox_id: &str, cursor: u64) {
        if let Some(watch) = self.watches.lock().unwrap().get_mut(mailbox_id) {
            watch.history_cursor = cursor;
        }
    }

    pub fn force_expiry(&self, mailbox_id: &str, expires_at: DateTime<Utc>) {
        if let Some(watch) = self.watches.lock().unwrap().get_mut(mailbox_id) {
            watch.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl WatchRepository for InMemoryWatchRepository {
    async fn get_watch(&self, mailbox_id: &str) -> DomainResult<Option<MailboxWatch>> {
        Ok(self.watch(mailbox_id))
    }

    async fn upsert_watch(&self, watch: &MailboxWatch) -> DomainResult<MailboxWatch> {
        let mut watches = self.watches.lock().unwrap();
        let stored = match watches.get(&watch.mailbox_id) {
            Some(existing) => MailboxWatch {
                resource_id: watch.resource_id.clone(),
                expires_at: watch.expires_at,
                renewed_at: watch.renewed_at,
                ..existing.clone()
            },
            None => watch.clone(),
        };
        watches.insert(watch.mailbox_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn compare_and_set_cursor(&self, mailbox_id: &str, expected: u64, new: u64) -> DomainResult<bool> {
        let mut watches = self.watches.lock().unwrap();
        match watches.get_mut(mailbox_id) {
            Some(watch) if watch.history_cursor == expected => {
                watch.history_cursor = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_watch(&self, mailbox_id: &str) -> DomainResult<bool> {
        Ok(self.watches.lock().unwrap().remove(mailbox_id).is_some())
    }

    async fn get_state(&self, mailbox_id: &str) -> DomainResult<Option<MailboxState>> {
        Ok(self.states.lock().unwrap().get(mailbox_id).cloned())
    }

    async fn put_state(&self, state: &MailboxState) -> DomainResult<()> {
        self.states.lock().unwrap().insert(state.mailbox_id.clone(), state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<String, ProcessingJob>>,
}

impl InMemoryJobRepository {
    pub fn all(&self) -> Vec<ProcessingJob> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    pub fn by_message(&self, message_id: &str) -> Option<ProcessingJob> {
        self.jobs.lock().unwrap().values().find(|job| job.message_id == message_id).cloned()
    }

    /// Replace a stored job as-is, bypassing version checks.
    pub fn overwrite(&self, job: ProcessingJob) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert_if_absent(&self, job: &ProcessingJob) -> DomainResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let exists = jobs
            .values()
            .any(|existing| existing.mailbox_id == job.mailbox_id && existing.message_id == job.message_id);
        if exists {
            return Ok(false);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(true)
    }

    async fn get(&self, job_id: &str) -> DomainResult<Option<ProcessingJob>> {
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn find_by_message(&self, mailbox_id: &str, message_id: &str) -> DomainResult<Option<ProcessingJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .find(|job| job.mailbox_id == mailbox_id && job.message_id == message_id)
            .cloned())
    }

    async fn compare_and_swap(&self, job: &ProcessingJob, expected_version: i64) -> DomainResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get(&job.id) {
            Some(stored) if stored.version == expected_version => {
                jobs.insert(job.id.clone(), job.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> DomainResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> =
            self.jobs.lock().unwrap().values().filter(|job| job.status == status).cloned().collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_abandoned(
        &self,
        now: DateTime<Utc>,
        excluded: &[String],
        limit: usize,
    ) -> DomainResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| !job.is_terminal() && !job.lease_is_live(now))
            .filter(|job| !excluded.contains(&job.mailbox_id))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_for_mailbox(&self, mailbox_id: &str, limit: usize) -> DomainResult<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> =
            self.jobs.lock().unwrap().values().filter(|job| job.mailbox_id == mailbox_id).cloned().collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    mailboxes: Mutex<Vec<ConnectedMailbox>>,
}

impl InMemoryDirectory {
    pub fn with_mailbox(self, mailbox: ConnectedMailbox) -> Self {
        self.mailboxes.lock().unwrap().push(mailbox);
        self
    }

    pub fn add(&self, mailbox: ConnectedMailbox) {
        self.mailboxes.lock().unwrap().push(mailbox);
    }

    pub fn disconnect(&self, mailbox_id: &str, at: DateTime<Utc>) {
        for mailbox in self.mailboxes.lock().unwrap().iter_mut() {
            if mailbox.mailbox_id == mailbox_id {
                mailbox.disconnected_at = Some(at);
            }
        }
    }
}

#[async_trait]
impl MailboxDirectory for InMemoryDirectory {
    async fn get(&self, mailbox_id: &str) -> DomainResult<Option<ConnectedMailbox>> {
        Ok(self.mailboxes.lock().unwrap().iter().find(|m| m.mailbox_id == mailbox_id).cloned())
    }

    async fn find_by_address(&self, address: &str) -> DomainResult<Option<ConnectedMailbox>> {
        let wanted = normalize_address(address);
        Ok(self
            .mailboxes
            .lock()
            .unwrap()
            .iter()
            .find(|m| normalize_address(&m.address) == wanted && m.is_connected())
            .cloned())
    }

    async fn list_connected(&self) -> DomainResult<Vec<ConnectedMailbox>> {
        Ok(self.mailboxes.lock().unwrap().iter().filter(|m| m.is_connected()).cloned().collect())
    }
}
