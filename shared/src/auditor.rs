//! Desync diagnostics
//!
//! A `Capture` is an owned map from stable entity id to that entity's
//! serialized sub-state. Two captures of simulations that saw the same tick
//! history must be equal; the first difference found is reported as a
//! `Divergence`.

use crate::simulation::Simulation;
use crate::step::Tick;
use log::warn;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

pub type StableKey = u64;

/// Immutable capture of a simulation's state at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    entries: BTreeMap<StableKey, Vec<u8>>,
}

impl Capture {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: StableKey) -> Option<&[u8]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = StableKey> + '_ {
        self.entries.keys().copied()
    }
}

impl FromIterator<(StableKey, Vec<u8>)> for Capture {
    fn from_iter<I: IntoIterator<Item = (StableKey, Vec<u8>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Which capture of a comparison lacks a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// First point at which two captures disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Divergence {
    #[error("capture sizes differ: local has {local} entries, remote has {remote}")]
    SizeMismatch { local: usize, remote: usize },

    #[error("key {key} is missing from the {missing_from} capture")]
    MissingKey { key: StableKey, missing_from: Side },

    #[error("key {key} differs: local {local:?}, remote {remote:?}")]
    ValueMismatch {
        key: StableKey,
        local: Vec<u8>,
        remote: Vec<u8>,
    },
}

/// Returns the first divergence between two captures, if any.
///
/// Size is checked first; after that keys are walked in ascending order.
pub fn compare(local: &Capture, remote: &Capture) -> Result<(), Divergence> {
    if local.len() != remote.len() {
        return Err(Divergence::SizeMismatch {
            local: local.len(),
            remote: remote.len(),
        });
    }
    match diff_keys(local, remote).next() {
        Some(divergence) => Err(divergence),
        None => Ok(()),
    }
}

/// Every key-level divergence between two captures, in key order.
pub fn diff(local: &Capture, remote: &Capture) -> Vec<Divergence> {
    diff_keys(local, remote).collect()
}

fn diff_keys<'a>(local: &'a Capture, remote: &'a Capture) -> impl Iterator<Item = Divergence> + 'a {
    let keys: BTreeSet<StableKey> = local.keys().chain(remote.keys()).collect();
    keys.into_iter()
        .filter_map(move |key| match (local.get(key), remote.get(key)) {
            (Some(_), None) => Some(Divergence::MissingKey {
                key,
                missing_from: Side::Remote,
            }),
            (None, Some(_)) => Some(Divergence::MissingKey {
                key,
                missing_from: Side::Local,
            }),
            (Some(l), Some(r)) if l != r => Some(Divergence::ValueMismatch {
                key,
                local: l.to_vec(),
                remote: r.to_vec(),
            }),
            _ => None,
        })
}

/// Keeps recent local captures by tick and checks remote ones against them.
#[derive(Debug)]
pub struct DesyncAuditor {
    history: VecDeque<(Tick, Capture)>,
    capacity: usize,
    detected: u64,
}

impl DesyncAuditor {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            detected: 0,
        }
    }

    /// Records the local capture for `tick`, evicting the oldest if full.
    pub fn record<S: Simulation>(&mut self, tick: Tick, sim: &S) {
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back((tick, sim.capture_debug_state()));
    }

    pub fn local(&self, tick: Tick) -> Option<&Capture> {
        self.history
            .iter()
            .find(|(recorded, _)| *recorded == tick)
            .map(|(_, capture)| capture)
    }

    /// Compares `remote` with the recorded local capture for `tick`.
    ///
    /// Returns `Ok(false)` when no local capture is held for that tick.
    /// Divergences are logged and counted; they never alter the simulation.
    pub fn check(&mut self, tick: Tick, remote: &Capture) -> Result<bool, Divergence> {
        let Some(local) = self.local(tick) else {
            return Ok(false);
        };
        match compare(local, remote) {
            Ok(()) => Ok(true),
            Err(divergence) => {
                self.detected += 1;
                warn!("Desync at tick {}: {}", tick, divergence);
                Err(divergence)
            }
        }
    }

    /// Compares two captures directly, logging any divergence.
    pub fn check_pair(&mut self, tick: Tick, local: &Capture, remote: &Capture) -> Result<(), Divergence> {
        compare(local, remote).inspect_err(|divergence| {
            self.detected += 1;
            warn!("Desync at tick {}: {}", tick, divergence);
        })
    }

    pub fn detected(&self) -> u64 {
        self.detected
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
