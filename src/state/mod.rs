// Copyright (c) 2025 - Cowboy AI, Inc.
//! Model-wide state handle
//!
//! [`State`] is the entry point: it owns the store handle, the retry
//! runner, the configuration, the constraints policy and the tracing span
//! every operation is instrumented with. It is cheap to clone and safe to
//! share between tasks.
//!
//! ```text
//! State ─┬─ model        (single document)
//!        ├─ machines     ─▶ Machine
//!        ├─ applications ─▶ Application ─▶ Unit
//!        ├─ subnets      ─▶ Subnet, IpAddress
//!        └─ sequences / cleanups / ssh host keys
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::config::StateConfig;
use crate::constraints::ConstraintsValidator;
use crate::errors::{StateError, StateResult, StoreError};
use crate::store::{Assert, Collection, ConditionalOp, DocumentStore, Filter, Update};
use crate::txn::{TestHook, TxnPlan, TxnRunner};

pub mod cleanup;
pub mod machines;
pub mod model;
pub mod subnets;
pub mod units;

pub use cleanup::{Cleanup, CleanupKind};
pub use model::{MigrationMode, Model};
pub use subnets::{IpAddress, Subnet, SubnetInfo};
pub use units::{Application, Unit};

struct Inner {
    store: Arc<dyn DocumentStore>,
    runner: TxnRunner,
    config: StateConfig,
    validator: ConstraintsValidator,
    span: Span,
}

/// Handle on one model's persistent state
#[derive(Clone)]
pub struct State {
    inner: Arc<Inner>,
}

impl State {
    /// Open state for the configured model, creating the model document if
    /// this is the first open against the store
    pub async fn open(store: Arc<dyn DocumentStore>, config: StateConfig) -> StateResult<Self> {
        config.validate()?;
        let span = info_span!("machine_state", model = %config.model_name);
        let st = State {
            inner: Arc::new(Inner {
                runner: TxnRunner::new(store.clone()).with_span(span.clone()),
                store,
                config,
                validator: ConstraintsValidator::default(),
                span,
            }),
        };
        st.ensure_model().instrument(st.span().clone()).await?;
        st.span()
            .in_scope(|| info!("Opened machine state for model {:?}", st.config().model_name));
        Ok(st)
    }

    /// Replace the span operations are instrumented with
    pub fn with_span(self, span: Span) -> Self {
        self.rebuild(|inner| {
            inner.runner = inner.runner.clone().with_span(span.clone());
            inner.span = span;
        })
    }

    /// Replace the provider constraints policy
    pub fn with_constraints_validator(self, validator: ConstraintsValidator) -> Self {
        self.rebuild(|inner| inner.validator = validator)
    }

    fn rebuild(self, change: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = Inner {
            store: self.inner.store.clone(),
            runner: self.inner.runner.clone(),
            config: self.inner.config.clone(),
            validator: self.inner.validator.clone(),
            span: self.inner.span.clone(),
        };
        change(&mut inner);
        State {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub(crate) fn runner(&self) -> &TxnRunner {
        &self.inner.runner
    }

    pub(crate) fn constraints_validator(&self) -> &ConstraintsValidator {
        &self.inner.validator
    }

    /// Queue hooks around the next transactions (race tests)
    pub fn set_test_hooks(&self, hooks: impl IntoIterator<Item = TestHook>) {
        self.inner.runner.set_test_hooks(hooks);
    }

    /// Hooks queued but not yet consumed
    pub fn pending_test_hooks(&self) -> usize {
        self.inner.runner.pending_test_hooks()
    }

    /// End the store session; every watcher terminates
    pub async fn close(&self) {
        self.inner.store.close().await;
    }

    /// Read and decode one document together with its revision
    pub(crate) async fn read<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> StateResult<Option<(T, i64)>> {
        match self.store().get(collection, id).await? {
            Some(doc) => Ok(Some((doc.decode()?, doc.revno))),
            None => Ok(None),
        }
    }

    /// Read and decode every matching document
    pub(crate) async fn read_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StateResult<Vec<T>> {
        self.store()
            .find(collection, filter)
            .await?
            .iter()
            .map(|doc| doc.decode().map_err(StateError::from))
            .collect()
    }

    /// Allocate the next value of a named counter, starting at zero
    ///
    /// Counters bypass the transaction runner so they never consume test
    /// hooks.
    pub(crate) async fn next_sequence(&self, name: &str) -> StateResult<u64> {
        for _ in 0..self.config().txn_attempts {
            let (next, op) = match self.store().get(Collection::Sequences, name).await? {
                None => (
                    0,
                    ConditionalOp::insert(Collection::Sequences, name, json!({ "counter": 1 })),
                ),
                Some(doc) => {
                    let counter = doc.body["counter"].as_u64().ok_or_else(|| {
                        StateError::Store(StoreError::Malformed {
                            collection: Collection::Sequences.to_string(),
                            id: name.to_string(),
                            reason: "counter is not an unsigned integer".to_string(),
                        })
                    })?;
                    (
                        counter,
                        ConditionalOp::update(Collection::Sequences, name, Update::new().inc("counter", 1))
                            .with_assert(Assert::Revno(doc.revno)),
                    )
                }
            };
            match self.store().apply_ops(vec![op]).await {
                Ok(()) => {
                    self.span()
                        .in_scope(|| debug!("Allocated {} from sequence {:?}", next, name));
                    return Ok(next);
                }
                Err(StoreError::Aborted) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(StateError::ExcessiveContention)
    }

    /// Replace the SSH host keys recorded for an entity tag
    pub async fn set_ssh_host_keys(&self, tag: &str, keys: Vec<String>) -> StateResult<()> {
        let keys = &keys[..];
        self.runner()
            .run(self.config().txn_attempts, move |_| self.ssh_host_keys_ops(tag, keys))
            .await
    }

    async fn ssh_host_keys_ops(&self, tag: &str, keys: &[String]) -> StateResult<TxnPlan> {
        let op = match self.store().get(Collection::SshHostKeys, tag).await? {
            None => ConditionalOp::insert(
                Collection::SshHostKeys,
                tag,
                to_body(&SshHostKeysDoc { keys: keys.to_vec() })?,
            ),
            Some(doc) => ConditionalOp::update(
                Collection::SshHostKeys,
                tag,
                Update::new().set("keys", keys.to_vec()),
            )
            .with_assert(Assert::Revno(doc.revno)),
        };
        Ok(TxnPlan::Apply(vec![op]))
    }

    /// SSH host keys for an entity tag; `NotFound` when none are recorded
    pub async fn get_ssh_host_keys(&self, tag: &str) -> StateResult<Vec<String>> {
        match self.read::<SshHostKeysDoc>(Collection::SshHostKeys, tag).await? {
            Some((doc, _)) => Ok(doc.keys),
            None => Err(StateError::NotFound(format!("keys for {tag}"))),
        }
    }

    async fn ensure_model(&self) -> StateResult<()> {
        if self.store().get(Collection::Models, model::MODEL_DOC_ID).await?.is_some() {
            return Ok(());
        }
        let doc = model::ModelDoc::new(&self.config().model_name, self.config().prefer_ipv6);
        let op = ConditionalOp::insert(Collection::Models, model::MODEL_DOC_ID, to_body(&doc)?);
        match self.store().apply_ops(vec![op]).await {
            Ok(()) | Err(StoreError::Aborted) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SshHostKeysDoc {
    keys: Vec<String>,
}

/// Encode a typed document for the store
pub(crate) fn to_body<T: Serialize>(doc: &T) -> StateResult<Value> {
    Ok(serde_json::to_value(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineJob;
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;
    use tracing_subscriber::Layer;

    /// Records each event's target with the names of its enclosing spans
    #[derive(Clone, Default)]
    struct SpanRecorder(Arc<Mutex<Vec<(String, Vec<&'static str>)>>>);

    impl SpanRecorder {
        fn take(&self) -> Vec<(String, Vec<&'static str>)> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl<S> Layer<S> for SpanRecorder
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
            let spans = ctx
                .event_scope(event)
                .map(|scope| scope.from_root().map(|span| span.name()).collect())
                .unwrap_or_default();
            self.0
                .lock()
                .unwrap()
                .push((event.metadata().target().to_string(), spans));
        }
    }

    async fn open() -> State {
        State::open(Arc::new(MemoryStore::new()), StateConfig::new("testenv"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_model_once() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let st = State::open(store.clone(), StateConfig::new("testenv")).await.unwrap();
        let again = State::open(store.clone(), StateConfig::new("testenv")).await.unwrap();

        assert_eq!(st.model().await.unwrap().name(), "testenv");
        assert_eq!(again.model().await.unwrap().name(), "testenv");
        let doc = store.get(Collection::Models, model::MODEL_DOC_ID).await.unwrap().unwrap();
        assert_eq!(doc.revno, 1);
    }

    #[tokio::test]
    async fn test_sequences_count_from_zero() {
        let st = open().await;
        assert_eq!(st.next_sequence("machine").await.unwrap(), 0);
        assert_eq!(st.next_sequence("machine").await.unwrap(), 1);
        assert_eq!(st.next_sequence("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ssh_host_keys() {
        let st = open().await;
        assert!(st.get_ssh_host_keys("machine-1").await.unwrap_err().is_not_found());

        st.set_ssh_host_keys("machine-1", vec!["rsa".into(), "dsa".into()])
            .await
            .unwrap();
        st.set_ssh_host_keys("machine-1", vec!["ed25519".into()]).await.unwrap();
        assert_eq!(
            st.get_ssh_host_keys("machine-1").await.unwrap(),
            vec!["ed25519".to_string()]
        );
    }

    #[tokio::test]
    async fn test_operations_log_inside_injected_span() {
        let recorder = SpanRecorder::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

        let st = open().await;
        let opened = recorder.take();
        assert!(opened
            .iter()
            .any(|(target, spans)| target == "cim_machine_state::state" && spans == &["machine_state"]));

        let st = st.with_span(info_span!("tenant"));
        st.add_machine("quantal", &[MachineJob::HostUnits]).await.unwrap();
        st.set_ssh_host_keys("machine-0", vec!["rsa".into()]).await.unwrap();

        let events: Vec<_> = recorder
            .take()
            .into_iter()
            .filter(|(target, _)| {
                target.starts_with("cim_machine_state::txn") || target.starts_with("cim_machine_state::state")
            })
            .collect();
        assert!(events.iter().any(|(target, _)| target == "cim_machine_state::txn"));
        assert!(events.iter().any(|(target, _)| target == "cim_machine_state::state::machines"));
        for (target, spans) in &events {
            assert_eq!(spans, &["tenant"], "event from {target}");
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let result = State::open(
            Arc::new(MemoryStore::new()),
            StateConfig::new("testenv").with_txn_attempts(0),
        )
        .await;
        assert!(matches!(result, Err(StateError::Configuration(_))));
    }
}
