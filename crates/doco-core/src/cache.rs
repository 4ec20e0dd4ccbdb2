//! State cache
//!
//! Holds the single authoritative runtime record of every configured door.
//! Each record sits behind its own async mutex: the periodic tick and the
//! command intake both take the lock for their whole read-modify-write, so
//! a command can never land in the middle of an estimate (or the other way
//! around). Doors never block each other.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::door::{DoorId, DoorRuntimeState};

/// Device-wide values that are only published on change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scalars {
    /// SoC temperature in degrees Celsius
    pub cpu_temperature: Option<f32>,
    /// Light relay state per door
    pub lights: BTreeMap<DoorId, bool>,
}

/// Point-in-time copy of one door for publishing and the HTTP API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorSnapshot {
    pub id: DoorId,
    pub runtime: DoorRuntimeState,
    pub light: Option<bool>,
}

/// Per-door runtime records plus device scalars
#[derive(Debug, Default)]
pub struct StateCache {
    doors: BTreeMap<DoorId, Arc<Mutex<DoorRuntimeState>>>,
    scalars: RwLock<Scalars>,
}

impl StateCache {
    /// Create a cache with an empty record for each door
    pub fn new(ids: impl IntoIterator<Item = DoorId>) -> Self {
        Self {
            doors: ids
                .into_iter()
                .map(|id| (id, Arc::new(Mutex::new(DoorRuntimeState::default()))))
                .collect(),
            scalars: RwLock::new(Scalars::default()),
        }
    }

    /// Take exclusive access to one door's record.
    ///
    /// Hold the guard for the whole read-modify-write.
    pub async fn lock(&self, id: &DoorId) -> Option<OwnedMutexGuard<DoorRuntimeState>> {
        let record = self.doors.get(id)?.clone();
        Some(record.lock_owned().await)
    }

    /// Copy of one door's record
    pub async fn get(&self, id: &DoorId) -> Option<DoorRuntimeState> {
        let record = self.doors.get(id)?;
        Some(record.lock().await.clone())
    }

    /// Copy of every door, in id order
    pub async fn snapshot(&self) -> Vec<DoorSnapshot> {
        let lights = self.scalars.read().await.lights.clone();
        let mut out = Vec::with_capacity(self.doors.len());
        for (id, record) in &self.doors {
            out.push(DoorSnapshot {
                id: id.clone(),
                runtime: record.lock().await.clone(),
                light: lights.get(id).copied(),
            });
        }
        out
    }

    pub async fn scalars(&self) -> Scalars {
        self.scalars.read().await.clone()
    }

    pub async fn set_cpu_temperature(&self, celsius: Option<f32>) {
        self.scalars.write().await.cpu_temperature = celsius;
    }

    pub async fn set_light(&self, id: &DoorId, on: bool) {
        self.scalars.write().await.lights.insert(id.clone(), on);
    }

    pub async fn light(&self, id: &DoorId) -> Option<bool> {
        self.scalars.read().await.lights.get(id).copied()
    }
}
