//! Job scheduler: the dispatch loop.
//!
//! On each invocation, computes free capacity in the two pools (heavy =
//! file downloads, light = validate/prepare/images), pops ready ids from
//! their rest stages, moves them into the matching active stage, and fires
//! stage workers without awaiting them. Every worker re-invokes the
//! scheduler from its completion path, which keeps the pipeline
//! self-driving with no polling timer.
//!
//! Invocations are guarded against re-entry: a call while a dispatch is in
//! flight is a silent no-op (with a rerun note so the in-flight pass runs
//! once more), and callers rely on the next natural trigger.

mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::context::Context;

/// Cheap-to-clone handle; one logical scheduler per process.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: Arc<Context>,
    in_progress: AtomicBool,
    rerun: AtomicBool,
    paused: AtomicBool,
    files_paused: AtomicBool,
    /// Abort token per active job id, registered by the running stage
    /// worker and fired by cancellation.
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<Context>) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                ctx,
                in_progress: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                files_paused: AtomicBool::new(false),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.ctx
    }

    /// Run one dispatch pass. Re-entrant calls no-op; dispatch errors are
    /// logged here because nothing may crash the loop itself.
    pub async fn schedule(&self) {
        if self.inner.in_progress.swap(true, Ordering::SeqCst) {
            self.inner.rerun.store(true, Ordering::SeqCst);
            return;
        }
        loop {
            if let Err(e) = dispatch::dispatch(self).await {
                tracing::error!("dispatch pass failed: {:#}", e);
            }
            if !self.inner.rerun.swap(false, Ordering::SeqCst) {
                break;
            }
        }
        self.inner.in_progress.store(false, Ordering::SeqCst);
    }

    /// Stop all dispatch (both pools). In-flight workers finish on their own.
    pub fn pause_all(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        tracing::info!("scheduler paused");
    }

    pub async fn resume_all(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.schedule().await;
    }

    /// Suppress only heavy-pool dispatch. Used when the vendor's file
    /// endpoints turn 403 so siblings stop hammering a closed door while
    /// light-pool work continues.
    pub fn pause_file_downloads(&self) {
        self.inner.files_paused.store(true, Ordering::SeqCst);
        tracing::info!("file downloads paused");
    }

    pub async fn resume_file_downloads(&self) {
        self.inner.files_paused.store(false, Ordering::SeqCst);
        self.schedule().await;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn file_downloads_paused(&self) -> bool {
        self.inner.files_paused.load(Ordering::SeqCst)
    }

    /// Register the abort token for a starting stage worker.
    pub(crate) fn register_cancel(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner
            .active
            .lock()
            .expect("active lock poisoned")
            .insert(id.to_string(), token.clone());
        token
    }

    pub(crate) fn release_cancel(&self, id: &str) {
        self.inner.active.lock().expect("active lock poisoned").remove(id);
    }

    /// Token for an in-flight job, if one is running.
    pub fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        self.inner
            .active
            .lock()
            .expect("active lock poisoned")
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ObjectApi, ObjectDetails};
    use crate::config::OvdConfig;
    use crate::fetch::InlineFetcher;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoApi;

    #[async_trait]
    impl ObjectApi for NoApi {
        async fn object_by_id(&self, _id: &str) -> Result<ObjectDetails, ApiError> {
            Err(ApiError::Network("no api in this test".into()))
        }
        async fn search(&self, _query: &str) -> Result<Vec<ObjectDetails>, ApiError> {
            Ok(Vec::new())
        }
        async fn bearer_token(&self) -> Result<String, ApiError> {
            Err(ApiError::Auth)
        }
    }

    async fn scheduler(tmp: &TempDir) -> Scheduler {
        let ctx = Context::open(
            OvdConfig::default(),
            tmp.path().to_path_buf(),
            Arc::new(NoApi),
            Arc::new(InlineFetcher::new(1024)),
        )
        .await
        .unwrap();
        Scheduler::new(ctx)
    }

    #[tokio::test]
    async fn pause_flags_toggle() {
        let tmp = TempDir::new().unwrap();
        let sched = scheduler(&tmp).await;
        assert!(!sched.is_paused());
        sched.pause_all();
        assert!(sched.is_paused());
        sched.resume_all().await;
        assert!(!sched.is_paused());

        sched.pause_file_downloads();
        assert!(sched.file_downloads_paused());
        assert!(!sched.is_paused());
        sched.resume_file_downloads().await;
        assert!(!sched.file_downloads_paused());
    }

    #[tokio::test]
    async fn cancel_tokens_register_and_release() {
        let tmp = TempDir::new().unwrap();
        let sched = scheduler(&tmp).await;
        let token = sched.register_cancel("42");
        let seen = sched.cancel_token("42").expect("registered");
        seen.cancel();
        assert!(token.is_cancelled());
        sched.release_cancel("42");
        assert!(sched.cancel_token("42").is_none());
    }

    #[tokio::test]
    async fn paused_schedule_dispatches_nothing() {
        use crate::state::Stage;
        let tmp = TempDir::new().unwrap();
        let sched = scheduler(&tmp).await;
        sched.context().store.add(Stage::Queued, "42").await.unwrap();
        sched.pause_all();
        sched.schedule().await;
        // Still queued: the paused invocation was a no-op.
        assert!(sched.context().store.contains(Stage::Queued, "42").await.unwrap());
    }
}
