// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory document store
//!
//! Honours the full [`DocumentStore`] contract and is the store used by the
//! test suite. Assertions are evaluated against the pre-batch state, the
//! batch is staged off to the side, and only a fully staged batch is
//! committed. Changes are published while the write lock is still held so
//! subscribers observe commit order.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{Change, ChangeStream, Collection, ConditionalOp, Document, DocumentStore, Filter, Mutation};
use crate::config::{StateConfig, DEFAULT_WATCHER_BUFFER};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    revno: i64,
    body: Value,
}

type Collections = HashMap<Collection, BTreeMap<String, Entry>>;

/// Document store held entirely in process memory
pub struct MemoryStore {
    collections: RwLock<Collections>,
    changes: Mutex<Option<broadcast::Sender<Change>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a store with the default change stream capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WATCHER_BUFFER)
    }

    /// Create a store sized by `config.watcher_buffer`
    pub fn from_config(config: &StateConfig) -> Self {
        Self::with_capacity(config.watcher_buffer)
    }

    /// Create a store whose change stream buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            collections: RwLock::new(HashMap::new()),
            changes: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn publish(&self, changes: Vec<Change>) {
        let sender = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = sender.as_ref() {
            for change in changes {
                // No subscribers is not an error.
                let _ = tx.send(change);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(collections: &'a Collections, collection: Collection, id: &str) -> Option<&'a Entry> {
    collections.get(&collection).and_then(|docs| docs.get(id))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_open()?;
        let collections = self.read()?;
        Ok(lookup(&collections, collection, id).map(|entry| Document {
            collection,
            id: id.to_string(),
            revno: entry.revno,
            body: entry.body.clone(),
        }))
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_open()?;
        let collections = self.read()?;
        let Some(docs) = collections.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.body))
            .map(|(id, entry)| Document {
                collection,
                id: id.clone(),
                revno: entry.revno,
                body: entry.body.clone(),
            })
            .collect())
    }

    async fn apply_ops(&self, ops: Vec<ConditionalOp>) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut collections = self.write()?;

        for op in &ops {
            let current = lookup(&collections, op.collection, &op.id);
            let holds = op.assert.holds(current.map(|e| (e.revno, &e.body)));
            let insert_clash = matches!(op.mutation, Mutation::Insert(_)) && current.is_some();
            if !holds || insert_clash {
                debug!(
                    "Transaction aborted on {}/{}: assertion {:?} failed",
                    op.collection, op.id, op.assert
                );
                return Err(StoreError::Aborted);
            }
        }

        // Stage every mutation before touching the collections.
        let mut staged: BTreeMap<(Collection, String), Option<Entry>> = BTreeMap::new();
        for op in ops {
            let key = (op.collection, op.id);
            let current = match staged.get(&key) {
                Some(entry) => entry.clone(),
                None => lookup(&collections, key.0, &key.1).cloned(),
            };
            let next = match op.mutation {
                Mutation::None => continue,
                Mutation::Insert(body) => {
                    if current.is_some() {
                        return Err(StoreError::Aborted);
                    }
                    Some(Entry { revno: 1, body })
                }
                Mutation::Update(update) => {
                    let Some(mut entry) = current else { continue };
                    update
                        .apply(&mut entry.body)
                        .map_err(|reason| StoreError::Malformed {
                            collection: key.0.to_string(),
                            id: key.1.clone(),
                            reason,
                        })?;
                    entry.revno += 1;
                    Some(entry)
                }
                Mutation::Remove => {
                    if current.is_none() {
                        continue;
                    }
                    None
                }
            };
            staged.insert(key, next);
        }

        let mut changes = Vec::with_capacity(staged.len());
        for ((collection, id), entry) in staged {
            let docs = collections.entry(collection).or_default();
            match entry {
                Some(entry) => {
                    changes.push(Change {
                        collection,
                        id: id.clone(),
                        revno: entry.revno,
                    });
                    docs.insert(id, entry);
                }
                None => {
                    if docs.remove(&id).is_some() {
                        changes.push(Change {
                            collection,
                            id,
                            revno: -1,
                        });
                    }
                }
            }
        }

        debug!("Committed {} document changes", changes.len());
        self.publish(changes);
        drop(collections);
        Ok(())
    }

    fn subscribe(&self) -> Result<ChangeStream, StoreError> {
        self.ensure_open()?;
        let sender = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        sender
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(StoreError::Closed)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender ends every receiver once drained.
        self.changes.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!("Memory document store closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
