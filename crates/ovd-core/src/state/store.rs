//! Durable state store: named id-sets backed by flat files plus per-job
//! metadata blobs, all under the private data directory.
//!
//! Layout: `states/<set>` (one id per line, deduplicated), `jobs/<id>.json`
//! (serialized [`Job`](crate::job::Job)), `locks/<set>/` (ephemeral lock
//! directories, see [`super::lock`]).
//!
//! Every set mutation happens under that set's lock; moves take both locks
//! in lexicographic name order so two opposing moves can never deadlock.

use anyhow::{Context as _, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::job::Job;
use crate::layout::sanitize_segment;

use super::lock::{LockOptions, SetLock};
use super::stage::Stage;

/// Set name for the free-form `id:message` failure log. Not a stage set:
/// lines are appended, never deduplicated.
const UNKNOWN_FAILURES: &str = "unknown_failures";

/// Handle to the on-disk state store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateStore {
    states_dir: PathBuf,
    jobs_dir: PathBuf,
    locks_dir: PathBuf,
    lock_opts: LockOptions,
}

impl StateStore {
    /// Open (creating if needed) the store under `data_dir`.
    pub async fn open(data_dir: &Path, lock_opts: LockOptions) -> Result<StateStore> {
        let store = StateStore {
            states_dir: data_dir.join("states"),
            jobs_dir: data_dir.join("jobs"),
            locks_dir: data_dir.join("locks"),
            lock_opts,
        };
        for dir in [&store.states_dir, &store.jobs_dir, &store.locks_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create state dir {}", dir.display()))?;
        }
        Ok(store)
    }

    /// Add `id` to a stage set. Idempotent; a second add leaves one occurrence.
    pub async fn add(&self, stage: Stage, id: &str) -> Result<()> {
        let _lock = self.lock(stage.as_str()).await?;
        let mut ids = self.read_set(stage.as_str()).await?;
        if !ids.iter().any(|x| x == id) {
            ids.push(id.to_string());
            self.write_set(stage.as_str(), &ids).await?;
        }
        Ok(())
    }

    /// Remove `id` from a stage set. No-op if absent.
    pub async fn remove(&self, stage: Stage, id: &str) -> Result<()> {
        let _lock = self.lock(stage.as_str()).await?;
        let mut ids = self.read_set(stage.as_str()).await?;
        let before = ids.len();
        ids.retain(|x| x != id);
        if ids.len() != before {
            self.write_set(stage.as_str(), &ids).await?;
        }
        Ok(())
    }

    /// Move `id` from one stage set to another, atomically with respect to
    /// other set mutations. Remove is a no-op if absent, add a no-op if
    /// present. Same-set moves take the single-lock fast path.
    pub async fn move_id(&self, from: Stage, to: Stage, id: &str) -> Result<()> {
        if from == to {
            return self.add(from, id).await;
        }

        let _locks = self.lock_pair(from, to).await?;

        let mut src = self.read_set(from.as_str()).await?;
        let before = src.len();
        src.retain(|x| x != id);
        if src.len() != before {
            self.write_set(from.as_str(), &src).await?;
        }

        let mut dst = self.read_set(to.as_str()).await?;
        if !dst.iter().any(|x| x == id) {
            dst.push(id.to_string());
            self.write_set(to.as_str(), &dst).await?;
        }
        Ok(())
    }

    /// Move `id` into `to` from whichever of `candidates` actually holds it.
    /// Used when the caller does not know the exact current stage (e.g.
    /// cancellation). Returns `true` if the id was found and moved; if no
    /// candidate holds it, nothing changes.
    pub async fn move_across(&self, candidates: &[Stage], to: Stage, id: &str) -> Result<bool> {
        for &from in candidates {
            if from == to {
                continue;
            }
            let _locks = self.lock_pair(from, to).await?;

            let mut src = self.read_set(from.as_str()).await?;
            let before = src.len();
            src.retain(|x| x != id);
            if src.len() == before {
                continue;
            }
            self.write_set(from.as_str(), &src).await?;

            let mut dst = self.read_set(to.as_str()).await?;
            if !dst.iter().any(|x| x == id) {
                dst.push(id.to_string());
                self.write_set(to.as_str(), &dst).await?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Snapshot of a stage set. Taken under the lock; may be stale the moment
    /// the lock is released, so callers re-check before acting.
    pub async fn get_all(&self, stage: Stage) -> Result<Vec<String>> {
        let _lock = self.lock(stage.as_str()).await?;
        self.read_set(stage.as_str()).await
    }

    /// Number of ids currently in a stage set.
    pub async fn count(&self, stage: Stage) -> Result<usize> {
        Ok(self.get_all(stage).await?.len())
    }

    pub async fn contains(&self, stage: Stage, id: &str) -> Result<bool> {
        Ok(self.get_all(stage).await?.iter().any(|x| x == id))
    }

    /// Remove and return the first id of a stage set, or `None` if empty.
    pub async fn pop(&self, stage: Stage) -> Result<Option<String>> {
        let _lock = self.lock(stage.as_str()).await?;
        let mut ids = self.read_set(stage.as_str()).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let id = ids.remove(0);
        self.write_set(stage.as_str(), &ids).await?;
        Ok(Some(id))
    }

    /// Union of every stage set. The superset used for orphan recovery and
    /// duplicate-enqueue checks.
    pub async fn all_known_ids(&self) -> Result<BTreeSet<String>> {
        let mut all = BTreeSet::new();
        for stage in Stage::ALL {
            all.extend(self.get_all(stage).await?);
        }
        Ok(all)
    }

    /// Persist a job record, independent of stage-set membership.
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let path = self.job_path(&job.id);
        let data = serde_json::to_vec_pretty(job).context("serialize job")?;
        write_atomic(&path, &data)
            .await
            .with_context(|| format!("write job file {}", path.display()))
    }

    /// Load a persisted job record, or `None` if there is no file for `id`.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let path = self.job_path(id);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let job = serde_json::from_slice(&data)
                    .with_context(|| format!("parse job file {}", path.display()))?;
                Ok(Some(job))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read job file {}", path.display())),
        }
    }

    /// Delete a persisted job record. No-op if absent.
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        let path = self.job_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove job file {}", path.display())),
        }
    }

    /// Ids that have a persisted job file, whether or not any stage set
    /// knows them. Compared against [`Self::all_known_ids`] to find orphans.
    pub async fn persisted_job_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.jobs_dir)
            .await
            .with_context(|| format!("read jobs dir {}", self.jobs_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Append `id:message` to the unknown-failure log, with newlines
    /// stripped from the message so the file stays line-oriented.
    pub async fn add_unknown_failure(&self, id: &str, error: &str) -> Result<()> {
        let _lock = self.lock(UNKNOWN_FAILURES).await?;
        let sanitized: String = error
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let mut lines = self.read_set(UNKNOWN_FAILURES).await?;
        lines.push(format!("{}:{}", id, sanitized));
        self.write_set(UNKNOWN_FAILURES, &lines).await
    }

    /// Raw lines of the unknown-failure log, oldest first.
    pub async fn unknown_failures(&self) -> Result<Vec<String>> {
        let _lock = self.lock(UNKNOWN_FAILURES).await?;
        self.read_set(UNKNOWN_FAILURES).await
    }

    async fn lock(&self, name: &str) -> Result<SetLock> {
        Ok(SetLock::acquire(&self.locks_dir, name, self.lock_opts).await?)
    }

    /// Both locks for a two-set move, acquired in lexicographic name order.
    /// The fixed global order makes deadlock between opposing moves
    /// structurally impossible.
    async fn lock_pair(&self, a: Stage, b: Stage) -> Result<(SetLock, SetLock)> {
        let (first, second) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
        let first_lock = self.lock(first.as_str()).await?;
        let second_lock = self.lock(second.as_str()).await?;
        Ok((first_lock, second_lock))
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", sanitize_segment(id)))
    }

    async fn read_set(&self, name: &str) -> Result<Vec<String>> {
        let path = self.states_dir.join(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read set {}", path.display())),
        };
        let mut seen = BTreeSet::new();
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| seen.insert(l.to_string()))
            .map(str::to_string)
            .collect())
    }

    async fn write_set(&self, name: &str, ids: &[String]) -> Result<()> {
        let path = self.states_dir.join(name);
        let mut data = ids.join("\n");
        if !data.is_empty() {
            data.push('\n');
        }
        write_atomic(&path, data.as_bytes())
            .await
            .with_context(|| format!("write set {}", path.display()))
    }
}

/// Write via a temp file and rename so a crash never leaves a half-written
/// set or job file behind.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}
