// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transaction retry engine
//!
//! Every mutation is expressed as a builder that reads current state and
//! returns the operation set to apply. The runner submits it; when the store
//! reports [`StoreError::Aborted`] the builder runs again against fresh
//! state, up to a bounded number of attempts.
//!
//! ```text
//! attempt 0 ─▶ build ─▶ apply ─▶ Ok
//!                          │
//!                       Aborted
//!                          ▼
//! attempt 1 ─▶ build ─▶ apply ─▶ ...   (budget exhausted ─▶ ExcessiveContention)
//! ```
//!
//! # Test hooks
//!
//! Race tests install [`TestHook`]s. The next transaction takes the first
//! hook, runs `before`, applies its operations, then runs `after`. While a
//! hook runs the pending list is stashed, so transactions issued from inside
//! a hook run unhooked.
//!
//! Every run is instrumented with the runner's span, so the commit and retry
//! events carry the owning model's context.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn, Instrument, Span};

use crate::errors::{StateError, StateResult, StoreError};
use crate::store::{ConditionalOp, DocumentStore};

/// What a builder wants the runner to do
#[derive(Debug, Clone, PartialEq)]
pub enum TxnPlan {
    /// Apply these operations
    Apply(Vec<ConditionalOp>),
    /// The desired state already holds
    Nothing,
}

/// Callback run around a single transaction attempt
pub type HookFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A pair of callbacks consumed by one transaction
#[derive(Default)]
pub struct TestHook {
    pub before: Option<HookFn>,
    pub after: Option<HookFn>,
}

impl TestHook {
    /// Hook that only runs before the transaction
    pub fn before<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            before: Some(Box::new(move || Box::pin(f()))),
            after: None,
        }
    }

    /// Hook that only runs after the transaction
    pub fn after<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            before: None,
            after: Some(Box::new(move || Box::pin(f()))),
        }
    }

    /// Attach an after callback to a before hook
    pub fn then<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after = Some(Box::new(move || Box::pin(f())));
        self
    }
}

/// Submits builder-produced operation sets with bounded retry
#[derive(Clone)]
pub struct TxnRunner {
    store: Arc<dyn DocumentStore>,
    hooks: Arc<Mutex<Vec<TestHook>>>,
    span: Span,
}

impl TxnRunner {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            hooks: Arc::new(Mutex::new(Vec::new())),
            span: Span::none(),
        }
    }

    /// Instrument every run with `span`; queued hooks stay shared
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `build` until its operations commit, it returns
    /// [`TxnPlan::Nothing`], it fails, or `max_attempts` attempts abort
    pub async fn run<F, Fut>(&self, max_attempts: u32, build: F) -> StateResult<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StateResult<TxnPlan>>,
    {
        self.run_attempts(max_attempts, build)
            .instrument(self.span.clone())
            .await
    }

    async fn run_attempts<F, Fut>(&self, max_attempts: u32, mut build: F) -> StateResult<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StateResult<TxnPlan>>,
    {
        for attempt in 0..max_attempts {
            let ops = match build(attempt).await? {
                TxnPlan::Nothing => return Ok(()),
                TxnPlan::Apply(ops) if ops.is_empty() => return Ok(()),
                TxnPlan::Apply(ops) => ops,
            };
            match self.run_transaction(ops).await {
                Ok(()) => {
                    debug!(attempt, "Transaction committed");
                    return Ok(());
                }
                Err(StoreError::Aborted) => {
                    debug!(attempt, "Transaction aborted; rebuilding");
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(max_attempts, "Giving up after repeated transaction aborts");
        Err(StateError::ExcessiveContention)
    }

    /// Apply one operation set, running the next test hook around it
    pub async fn run_transaction(&self, ops: Vec<ConditionalOp>) -> Result<(), StoreError> {
        let mut pending = std::mem::take(&mut *self.lock_hooks());
        if pending.is_empty() {
            return self.store.apply_ops(ops).await;
        }
        let hook = pending.remove(0);

        if let Some(before) = hook.before {
            before().await;
        }
        let result = self.store.apply_ops(ops).await;
        if let Some(after) = hook.after {
            after().await;
        }

        let mut hooks = self.lock_hooks();
        pending.append(&mut hooks);
        *hooks = pending;
        result
    }

    /// Queue hooks for the next transactions, in order
    pub fn set_test_hooks(&self, hooks: impl IntoIterator<Item = TestHook>) {
        self.lock_hooks().extend(hooks);
    }

    /// Number of hooks not yet consumed
    pub fn pending_test_hooks(&self) -> usize {
        self.lock_hooks().len()
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Vec<TestHook>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Assert, Collection, MemoryStore, Update};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runner() -> (Arc<MemoryStore>, TxnRunner) {
        let store = Arc::new(MemoryStore::new());
        let runner = TxnRunner::new(store.clone());
        (store, runner)
    }

    async fn seed(store: &MemoryStore) {
        store
            .apply_ops(vec![ConditionalOp::insert(
                Collection::Machines,
                "0",
                json!({"counter": 0}),
            )])
            .await
            .unwrap();
    }

    fn bump(store: Arc<MemoryStore>) -> impl FnOnce() -> BoxFuture<'static, ()> + Send {
        move || {
            Box::pin(async move {
                store
                    .apply_ops(vec![ConditionalOp::update(
                        Collection::Machines,
                        "0",
                        Update::new().inc("counter", 1),
                    )])
                    .await
                    .unwrap();
            })
        }
    }

    fn cas_increment(
        store: Arc<MemoryStore>,
    ) -> impl FnMut(u32) -> BoxFuture<'static, StateResult<TxnPlan>> {
        move |_attempt| {
            let store = store.clone();
            Box::pin(async move {
                let doc = store.get(Collection::Machines, "0").await?;
                let Some(doc) = doc else {
                    return Ok(TxnPlan::Nothing);
                };
                Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                    Collection::Machines,
                    "0",
                    Update::new().inc("counter", 1),
                )
                .with_assert(Assert::Revno(doc.revno))]))
            })
        }
    }

    #[tokio::test]
    async fn test_nothing_plan_short_circuits() {
        let (_, runner) = runner();
        let calls = AtomicU32::new(0);
        runner
            .run(3, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(TxnPlan::Nothing) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_rebuilds_from_fresh_state() {
        let (store, runner) = runner();
        seed(&store).await;
        runner.set_test_hooks([TestHook {
            before: Some(Box::new(bump(store.clone()))),
            after: None,
        }]);

        runner.run(3, cas_increment(store.clone())).await.unwrap();

        let doc = store.get(Collection::Machines, "0").await.unwrap().unwrap();
        assert_eq!(doc.body["counter"], json!(2));
        assert_eq!(runner.pending_test_hooks(), 0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_contention() {
        let (store, runner) = runner();
        seed(&store).await;
        let hooks: Vec<TestHook> = (0..3)
            .map(|_| TestHook {
                before: Some(Box::new(bump(store.clone()))),
                after: None,
            })
            .collect();
        runner.set_test_hooks(hooks);

        let err = runner.run(3, cas_increment(store.clone())).await.unwrap_err();
        assert!(matches!(err, StateError::ExcessiveContention));
        assert_eq!(
            err.to_string(),
            "state changing too quickly; try again soon"
        );
    }

    #[tokio::test]
    async fn test_builder_error_is_not_retried() {
        let (_, runner) = runner();
        let calls = AtomicU32::new(0);
        let err = runner
            .run(5, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StateError::NotFound("machine 1".to_string())) }
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_transactions_run_unhooked() {
        let (store, runner) = runner();
        seed(&store).await;
        let nested = runner.clone();

        runner.set_test_hooks([
            TestHook::before(move || async move {
                // Would consume the second hook if hooks were visible here.
                nested
                    .run_transaction(vec![ConditionalOp::update(
                        Collection::Machines,
                        "0",
                        Update::new().inc("counter", 10),
                    )])
                    .await
                    .unwrap();
            }),
            TestHook::default(),
        ]);

        runner
            .run_transaction(vec![ConditionalOp::update(
                Collection::Machines,
                "0",
                Update::new().inc("counter", 1),
            )])
            .await
            .unwrap();
        assert_eq!(runner.pending_test_hooks(), 1);

        let doc = store.get(Collection::Machines, "0").await.unwrap().unwrap();
        assert_eq!(doc.body["counter"], json!(11));
    }

    #[tokio::test]
    async fn test_after_hook_sees_committed_state() {
        let (store, runner) = runner();
        seed(&store).await;
        let observed = Arc::new(Mutex::new(None));
        let observer_store = store.clone();
        let observer = observed.clone();
        runner.set_test_hooks([TestHook::after(move || async move {
            let doc = observer_store.get(Collection::Machines, "0").await.unwrap();
            *observer.lock().unwrap() = doc.map(|d| d.body["counter"].clone());
        })]);

        runner.run(3, cas_increment(store.clone())).await.unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(json!(1)));
    }
}
