// Copyright (c) 2025 - Cowboy AI, Inc.
//! Change watchers
//!
//! Watchers sit on the store's change stream and turn raw document changes
//! into domain notifications:
//!
//! ```text
//! DocumentStore ──Change──▶ ChangeFeed ──▶ NotifyWatcher  (one document, coalesced)
//!                                     └──▶ UnitsWatcher   (unit names whose life changed)
//! ```
//!
//! Every watcher delivers an initial event, then coalesces everything that
//! happened since the last event into the next one. A lagging receiver
//! treats the gap as a change. Closing the store ends the watcher with
//! [`StateError::StoreClosed`].

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

use crate::errors::{StateError, StateResult};
use crate::store::{Change, ChangeStream};

pub mod notify;
pub mod units;

pub use notify::NotifyWatcher;
pub use units::UnitsWatcher;

/// Receiving end of the change stream with relevance filtering
struct ChangeFeed {
    rx: ChangeStream,
}

impl ChangeFeed {
    fn new(rx: ChangeStream) -> Self {
        Self { rx }
    }

    /// Consume buffered changes without waiting; true if any was relevant
    fn drain(&mut self, relevant: impl Fn(&Change) -> bool) -> StateResult<bool> {
        let mut seen = false;
        loop {
            match self.rx.try_recv() {
                Ok(change) => seen |= relevant(&change),
                Err(TryRecvError::Empty) => return Ok(seen),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watcher lagged behind the change stream");
                    seen = true;
                }
                Err(TryRecvError::Closed) => return Err(StateError::StoreClosed),
            }
        }
    }

    /// Wait for the next relevant change
    async fn wait(&mut self, relevant: impl Fn(&Change) -> bool) -> StateResult<()> {
        loop {
            match self.rx.recv().await {
                Ok(change) if relevant(&change) => return Ok(()),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watcher lagged behind the change stream");
                    return Ok(());
                }
                Err(RecvError::Closed) => return Err(StateError::StoreClosed),
            }
        }
    }
}
