//! In-memory download history
//!
//! Every job the process has seen is kept here for the lifetime of the
//! process, keyed by its fingerprint. Workers finishing concurrently race on
//! status updates, so all access goes through a single mutex.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, trace};

use super::models::{Job, JobStatus};
use super::{DownloadError, Result};

/// What the queue should do with a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First time this id is seen, the job was recorded as `IN_QUEUE`
    New(Job),
    /// The id previously failed and was flipped to `RETRYING`
    Retry(Job),
    /// The id is already queued, running, or completed
    Duplicate(Job),
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<String, Entry>,
}

#[derive(Debug, Default)]
pub struct History {
    inner: Mutex<Inner>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    // The map only holds plain data, so a panic elsewhere cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert `job` unless its id is already known. Returns whether it was inserted.
    ///
    /// The first insert wins; a later `put` with the same id never resets `created_at`.
    pub fn put(&self, job: Job) -> bool {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id) {
            trace!(id = %job.id, "Job already recorded, keeping first insert");
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        debug!(id = %job.id, name = %job.name, "Recording job in history");
        inner.jobs.insert(job.id.clone(), Entry { seq, job });
        true
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().jobs.contains_key(id)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Job> {
        self.lock()
            .jobs
            .get(id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    /// Overwrite the status of a known job. Unknown ids are ignored.
    pub fn update_status(&self, id: &str, status: JobStatus) {
        let mut inner = self.lock();
        match inner.jobs.get_mut(id) {
            Some(entry) => {
                trace!(id, from = %entry.job.status, to = %status, "Status change");
                entry.job.status = status;
            }
            None => trace!(id, %status, "Status update for unknown job ignored"),
        }
    }

    /// All jobs, oldest first. Jobs created in the same instant keep insertion order.
    pub fn get(&self) -> Vec<Job> {
        let inner = self.lock();
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by(|a, b| {
            a.job
                .created_at
                .cmp(&b.job.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the dedup/retry decision for `job` under one lock, so two
    /// concurrent submissions of a URL are never both admitted as new.
    pub fn admit(&self, job: Job) -> Admission {
        let mut inner = self.lock();
        if let Some(entry) = inner.jobs.get_mut(&job.id) {
            return if entry.job.status == JobStatus::Failed {
                entry.job.status = JobStatus::Retrying;
                Admission::Retry(entry.job.clone())
            } else {
                Admission::Duplicate(entry.job.clone())
            };
        }

        let mut job = job;
        job.status = JobStatus::InQueue;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id.clone(),
            Entry {
                seq,
                job: job.clone(),
            },
        );
        Admission::New(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::Category;
    use chrono::Duration;

    fn job(url: &str) -> Job {
        Job::new(url, None, Category::Checkpoints)
    }

    #[test]
    fn test_put_is_first_write_wins() {
        let history = History::new();
        let first = job("https://example.com/a.safetensors");
        let created_at = first.created_at;
        assert!(history.put(first.clone()));

        let mut again = first.clone();
        again.created_at = created_at + Duration::seconds(30);
        again.name = "renamed".into();
        assert!(!history.put(again));

        let stored = history.get_by_id(&first.id).unwrap();
        assert_eq!(stored.created_at, created_at);
        assert_eq!(stored.name, "checkpoints");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_get_by_id_missing_is_not_found() {
        let history = History::new();
        assert!(!history.exists("nope"));
        assert!(matches!(
            history.get_by_id("nope"),
            Err(DownloadError::NotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_update_status_unknown_id_is_noop() {
        let history = History::new();
        history.update_status("ghost", JobStatus::Completed);
        assert!(history.is_empty());

        let a = job("https://example.com/a.safetensors");
        history.put(a.clone());
        history.update_status(&a.id, JobStatus::Downloading);
        assert_eq!(history.get_by_id(&a.id).unwrap().status, JobStatus::Downloading);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_get_orders_by_created_at() {
        let history = History::new();
        let now = chrono::Utc::now();

        let mut late = job("https://example.com/late.safetensors");
        late.created_at = now + Duration::seconds(10);
        let mut early = job("https://example.com/early.safetensors");
        early.created_at = now - Duration::seconds(10);
        let mut middle = job("https://example.com/middle.safetensors");
        middle.created_at = now;

        history.put(late.clone());
        history.put(early.clone());
        history.put(middle.clone());
        history.update_status(&early.id, JobStatus::Failed);

        let ids: Vec<String> = history.get().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![early.id, middle.id, late.id]);
    }

    #[test]
    fn test_same_instant_keeps_insertion_order() {
        let history = History::new();
        let now = chrono::Utc::now();
        let mut ids = Vec::new();
        for i in 0..20 {
            let mut j = job(&format!("https://example.com/{i}.safetensors"));
            j.created_at = now;
            ids.push(j.id.clone());
            history.put(j);
        }
        let listed: Vec<String> = history.get().into_iter().map(|j| j.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_admit_decisions() {
        let history = History::new();
        let a = job("https://example.com/a.safetensors");

        assert!(matches!(history.admit(a.clone()), Admission::New(j) if j.status == JobStatus::InQueue));
        assert!(matches!(history.admit(a.clone()), Admission::Duplicate(_)));

        history.update_status(&a.id, JobStatus::Downloading);
        assert!(matches!(history.admit(a.clone()), Admission::Duplicate(_)));

        history.update_status(&a.id, JobStatus::Completed);
        assert!(matches!(history.admit(a.clone()), Admission::Duplicate(_)));

        history.update_status(&a.id, JobStatus::Failed);
        let created_at = history.get_by_id(&a.id).unwrap().created_at;
        match history.admit(job("https://example.com/a.safetensors")) {
            Admission::Retry(j) => {
                assert_eq!(j.status, JobStatus::Retrying);
                assert_eq!(j.created_at, created_at);
                assert_eq!(j.id, a.id);
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(history.len(), 1);
    }
}
