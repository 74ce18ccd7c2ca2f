use std::collections::{HashMap, HashSet};

use super::types::Transition;

/// Last known reachability per address for one monitoring run.
///
/// An address that is absent is unknown. It only ever goes from unknown to a
/// value, or flips between values. A fresh instance is built on every start,
/// so a restart never produces a notification for its first observation.
#[derive(Debug, Default)]
pub struct TargetState {
    last: HashMap<String, bool>,
}

impl TargetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reachable` for `address` and classify the change
    pub fn record(&mut self, address: &str, reachable: bool) -> Transition {
        match self.last.get_mut(address) {
            None => {
                self.last.insert(address.to_string(), reachable);
                Transition::FirstObservation
            }
            Some(previous) if *previous == reachable => Transition::Unchanged,
            Some(previous) => {
                *previous = reachable;
                Transition::Changed
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<bool> {
        self.last.get(address).copied()
    }

    /// Drop addresses that are no longer configured
    pub fn retain_addresses<'a>(&mut self, live: impl IntoIterator<Item = &'a str>) {
        let live: HashSet<&str> = live.into_iter().collect();
        self.last.retain(|address, _| live.contains(address.as_str()));
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
