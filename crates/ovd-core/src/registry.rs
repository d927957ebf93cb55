//! In-memory job registry, mirrored write-through to the state store.
//!
//! One instance per process, constructed at startup by hydrating the
//! persisted job files and injected wherever job records are read or
//! mutated. Subscribers get the full job list after every mutation;
//! delivery is synchronous and isolated per listener, so one misbehaving
//! listener cannot block the rest.

use anyhow::Result;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::api::ObjectDetails;
use crate::job::Job;
use crate::state::{Stage, StateStore};

/// Batch size for bulk clears; a cooperative yield runs between batches so
/// clearing hundreds of jobs does not starve other scheduled work.
const CLEAR_BATCH: usize = 25;

pub type ListenerId = u64;
type Listener = Box<dyn Fn(&[Job]) + Send + Sync>;

pub struct JobRegistry {
    store: StateStore,
    jobs: RwLock<HashMap<String, Job>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

impl JobRegistry {
    /// Build the registry by loading every persisted job file. Call once at
    /// startup; mid-flight restarts are healed lazily by [`Self::update_job`].
    pub async fn hydrate(store: StateStore) -> Result<JobRegistry> {
        let mut jobs = HashMap::new();
        for id in store.persisted_job_ids().await? {
            if let Some(job) = store.get_job(&id).await? {
                jobs.insert(job.id.clone(), job);
            }
        }
        tracing::debug!("registry hydrated with {} job(s)", jobs.len());
        Ok(JobRegistry {
            store,
            jobs: RwLock::new(jobs),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Create (or return the existing) record for `id`, starting at
    /// `Queued` with zero progress.
    pub async fn add_job(&self, id: &str) -> Result<Job> {
        if let Some(existing) = self.get_job(id) {
            return Ok(existing);
        }
        let job = Job::new(id);
        self.store.save_job(&job).await?;
        self.jobs
            .write()
            .expect("jobs lock poisoned")
            .insert(job.id.clone(), job.clone());
        self.notify();
        Ok(job)
    }

    /// Upsert stage/progress/message (and error when given). A record
    /// missing from memory is hydrated from persisted storage first, which
    /// heals process restarts mid-flight. Always persists, then notifies.
    pub async fn update_job(
        &self,
        id: &str,
        stage: Stage,
        progress: u8,
        message: &str,
        error: Option<String>,
    ) -> Result<Job> {
        let mut job = match self.get_job(id) {
            Some(job) => job,
            None => match self.store.get_job(id).await? {
                Some(job) => job,
                None => Job::new(id),
            },
        };
        job.stage = stage;
        job.progress = progress.min(100);
        job.message = message.to_string();
        if let Some(error) = error {
            job.error = Some(error);
        }
        self.store.save_job(&job).await?;
        self.jobs
            .write()
            .expect("jobs lock poisoned")
            .insert(job.id.clone(), job.clone());
        self.notify();
        Ok(job)
    }

    /// Replace only the metadata snapshot, leaving stage/progress untouched.
    pub async fn update_job_object(&self, id: &str, object: ObjectDetails) -> Result<()> {
        let mut job = match self.get_job(id) {
            Some(job) => job,
            None => match self.store.get_job(id).await? {
                Some(job) => job,
                None => Job::new(id),
            },
        };
        job.object = Some(object);
        self.store.save_job(&job).await?;
        self.jobs
            .write()
            .expect("jobs lock poisoned")
            .insert(job.id.clone(), job.clone());
        self.notify();
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.read().expect("jobs lock poisoned").get(id).cloned()
    }

    /// All jobs, sorted by display name (case-insensitive) with the id as
    /// tiebreak. Deterministic for UI stability and tests.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .expect("jobs lock poisoned")
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            let name_a = a.display_name().to_lowercase();
            let name_b = b.display_name().to_lowercase();
            name_a.cmp(&name_b).then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    /// Delete the job everywhere: memory, persisted file, and every stage
    /// set. Defensive about the current stage on purpose.
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        self.jobs.write().expect("jobs lock poisoned").remove(id);
        self.store.remove_job(id).await?;
        for stage in Stage::ALL {
            self.store.remove(stage, id).await?;
        }
        self.notify();
        Ok(())
    }

    /// Drop the record and its persisted file but leave stage-set
    /// membership alone. The cancellation path uses this after it has
    /// already moved the id into the cancelled set.
    pub async fn forget_job(&self, id: &str) -> Result<()> {
        self.jobs.write().expect("jobs lock poisoned").remove(id);
        self.store.remove_job(id).await?;
        self.notify();
        Ok(())
    }

    /// Remove every job currently completed. Batched with a cooperative
    /// yield so a large clear cannot monopolize the runtime.
    pub async fn clear_completed(&self) -> Result<usize> {
        self.clear_stages(&[Stage::Completed]).await
    }

    /// Remove every job in any terminal failure stage.
    pub async fn clear_failed(&self) -> Result<usize> {
        self.clear_stages(&Stage::FAILURES).await
    }

    async fn clear_stages(&self, stages: &[Stage]) -> Result<usize> {
        let mut ids = Vec::new();
        for &stage in stages {
            ids.extend(self.store.get_all(stage).await?);
        }

        let mut cleared = 0;
        for batch in ids.chunks(CLEAR_BATCH) {
            for id in batch {
                self.jobs.write().expect("jobs lock poisoned").remove(id);
                self.store.remove_job(id).await?;
                // Membership is known here: the ids came from these sets.
                for &stage in stages {
                    self.store.remove(stage, id).await?;
                }
                cleared += 1;
            }
            self.notify();
            tokio::task::yield_now().await;
        }
        Ok(cleared)
    }

    /// Register a listener receiving the full job list after every
    /// mutation. Listeners must not subscribe or unsubscribe from inside
    /// the callback.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Synchronous delivery; a panicking listener is logged and skipped so
    /// it cannot take down callers or its peers.
    fn notify(&self) {
        let snapshot = self.jobs();
        let listeners = self.listeners.lock().expect("listeners lock poisoned");
        for (id, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                tracing::warn!("job listener {} panicked; continuing", id);
            }
        }
    }
}
