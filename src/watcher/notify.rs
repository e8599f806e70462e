// Copyright (c) 2025 - Cowboy AI, Inc.
//! Coalescing notifications for a single document

use futures::stream::{self, Stream};
use tracing::debug;

use super::ChangeFeed;
use crate::errors::{StateError, StateResult};
use crate::state::State;
use crate::store::{Change, Collection};

/// Signals that a document changed, without saying how
///
/// Any number of changes between two calls to [`next`](Self::next) yield
/// one notification. The first call always yields, even for a document that
/// does not exist.
pub struct NotifyWatcher {
    feed: ChangeFeed,
    collection: Collection,
    id: String,
    pending: bool,
    stopped: bool,
    err: Option<StateError>,
}

impl NotifyWatcher {
    /// Watch one document
    pub fn for_document(st: &State, collection: Collection, id: &str) -> StateResult<Self> {
        let rx = st.store().subscribe()?;
        debug!(%collection, id, "Watching document");
        Ok(Self {
            feed: ChangeFeed::new(rx),
            collection,
            id: id.to_string(),
            pending: true,
            stopped: false,
            err: None,
        })
    }

    /// Wait for the next notification; `None` once stopped or dead
    pub async fn next(&mut self) -> Option<()> {
        if self.stopped || self.err.is_some() {
            return None;
        }
        loop {
            let (collection, id) = (self.collection, self.id.as_str());
            let relevant = |c: &Change| c.collection == collection && c.id == id;
            match self.feed.drain(relevant) {
                Ok(seen) => self.pending |= seen,
                Err(err) => return self.fail(err),
            }
            if self.pending {
                self.pending = false;
                return Some(());
            }
            if let Err(err) = self.feed.wait(relevant).await {
                return self.fail(err);
            }
            self.pending = true;
        }
    }

    /// Stop delivering notifications
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Why the watcher died, if it did
    pub fn err(&self) -> Option<&StateError> {
        self.err.as_ref()
    }

    /// Notifications as a stream
    pub fn into_stream(self) -> impl Stream<Item = ()> {
        stream::unfold(self, |mut w| async move { w.next().await.map(|event| (event, w)) })
    }

    fn fail(&mut self, err: StateError) -> Option<()> {
        debug!(collection = %self.collection, id = %self.id, error = %err, "Document watcher stopped");
        self.err = Some(err);
        None
    }
}
