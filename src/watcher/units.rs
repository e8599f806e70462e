// Copyright (c) 2025 - Cowboy AI, Inc.
//! Life changes of the units deployed to a machine
//!
//! The watched set is the machine's principal units, optionally with their
//! subordinates. Each event lists the names that entered the set, left it,
//! or changed life since the previous event. A unit that leaves the set
//! after being reported Dead is dropped silently.

use futures::stream::{self, Stream};
use std::collections::BTreeMap;
use tracing::debug;

use super::ChangeFeed;
use crate::errors::{StateError, StateResult};
use crate::machine::MachineDoc;
use crate::state::units::UnitDoc;
use crate::state::State;
use crate::state_machine::Life;
use crate::store::{Change, Collection};

/// Reports unit names whose presence or life changed on a machine
pub struct UnitsWatcher {
    st: State,
    feed: ChangeFeed,
    machine_id: String,
    include_subordinates: bool,
    known: Option<BTreeMap<String, Life>>,
    dirty: bool,
    stopped: bool,
    err: Option<StateError>,
}

impl UnitsWatcher {
    pub fn new(st: &State, machine_id: &str, include_subordinates: bool) -> StateResult<Self> {
        let rx = st.store().subscribe()?;
        debug!(machine = machine_id, include_subordinates, "Watching machine units");
        Ok(Self {
            st: st.clone(),
            feed: ChangeFeed::new(rx),
            machine_id: machine_id.to_string(),
            include_subordinates,
            known: None,
            dirty: false,
            stopped: false,
            err: None,
        })
    }

    /// Wait for the next batch of changed unit names, sorted
    ///
    /// The first call reports the whole current set, which may be empty.
    /// Returns `None` once stopped or dead.
    pub async fn next(&mut self) -> Option<Vec<String>> {
        if self.stopped || self.err.is_some() {
            return None;
        }
        if self.known.is_none() {
            return match self.current().await {
                Ok(current) => {
                    let names = current.keys().cloned().collect();
                    self.known = Some(current);
                    Some(names)
                }
                Err(err) => self.fail(err),
            };
        }

        loop {
            let machine_id = self.machine_id.as_str();
            let relevant = |c: &Change| {
                c.collection == Collection::Units
                    || (c.collection == Collection::Machines && c.id == machine_id)
            };
            match self.feed.drain(relevant) {
                Ok(seen) => self.dirty |= seen,
                Err(err) => return self.fail(err),
            }
            if self.dirty {
                let current = match self.current().await {
                    Ok(current) => current,
                    Err(err) => return self.fail(err),
                };
                self.dirty = false;
                let changed = self.merge(current);
                if !changed.is_empty() {
                    return Some(changed);
                }
                continue;
            }
            if let Err(err) = self.feed.wait(relevant).await {
                return self.fail(err);
            }
            self.dirty = true;
        }
    }

    /// Stop delivering events
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Why the watcher died, if it did
    pub fn err(&self) -> Option<&StateError> {
        self.err.as_ref()
    }

    /// Events as a stream
    pub fn into_stream(self) -> impl Stream<Item = Vec<String>> {
        stream::unfold(self, |mut w| async move { w.next().await.map(|event| (event, w)) })
    }

    /// Replace the known set, returning the names that differ
    fn merge(&mut self, current: BTreeMap<String, Life>) -> Vec<String> {
        let known = self.known.take().unwrap_or_default();
        let mut changed: Vec<String> = current
            .iter()
            .filter(|(name, life)| known.get(*name) != Some(*life))
            .map(|(name, _)| name.clone())
            .collect();
        changed.extend(
            known
                .iter()
                .filter(|(name, life)| !current.contains_key(*name) && **life != Life::Dead)
                .map(|(name, _)| name.clone()),
        );
        changed.sort();
        self.known = Some(current);
        changed
    }

    /// Units currently deployed to the machine with their life
    async fn current(&self) -> StateResult<BTreeMap<String, Life>> {
        let mut units = BTreeMap::new();
        let Some((machine, _)) = self
            .st
            .read::<MachineDoc>(Collection::Machines, &self.machine_id)
            .await?
        else {
            return Ok(units);
        };
        for name in &machine.principals {
            let Some((unit, _)) = self.st.read::<UnitDoc>(Collection::Units, name).await? else {
                continue;
            };
            if self.include_subordinates {
                for sub in &unit.subordinates {
                    if let Some((sub, _)) = self.st.read::<UnitDoc>(Collection::Units, sub).await? {
                        units.insert(sub.name, sub.life);
                    }
                }
            }
            units.insert(unit.name, unit.life);
        }
        Ok(units)
    }

    fn fail(&mut self, err: StateError) -> Option<Vec<String>> {
        debug!(machine = %self.machine_id, error = %err, "Units watcher stopped");
        self.err = Some(err);
        None
    }
}
