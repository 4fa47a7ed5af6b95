/// Checkpoint and restart.
///
/// A [`CheckpointManager`] keeps a bounded ring of deep-copied
/// [`SimState`] snapshots. Eviction is FIFO by creation: recovery always
/// wants the most recent consistent point, so access never refreshes an
/// entry. Snapshots can also be written to disk in a small versioned
/// format ([`persist`] / [`load`]).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::SimState;
use crate::time::SimTime;

/// Bumped whenever the persisted layout or [`SimState`] serialization changes.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"TSCK";

// ── Identifiers ───────────────────────────────────────────────────────

/// Generation index of a snapshot. Monotonic per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S#{}", self.0)
    }
}

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("snapshot {0} is not retained")]
    NotFound(SnapshotId),

    #[error("no checkpoint has been taken")]
    Empty,

    #[error("checkpoint i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize checkpoint: {0}")]
    Serialization(String),

    #[error("cannot deserialize checkpoint: {0}")]
    Deserialization(String),

    #[error("{} is not a checkpoint file", .0.display())]
    BadMagic(PathBuf),

    #[error("checkpoint format version {found} is not supported (expected {expected})")]
    IncompatibleVersion { found: u32, expected: u32 },
}

// ── Policy ────────────────────────────────────────────────────────────

/// When the engine takes automatic checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CheckpointPolicy {
    /// Never; only explicit [`CheckpointManager::checkpoint`] calls.
    Off,
    /// Before every `n`-th event.
    EveryEvents(u64),
    /// Whenever at least this many simulated seconds passed since the
    /// latest snapshot.
    EveryInterval(f64),
    /// Immediately before each event, enabling single-step rollback.
    #[default]
    BeforeEachEvent,
}

// ── Snapshot ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// Wall clock, Unix milliseconds.
    pub created_at: u64,
    pub sim_time: SimTime,
    /// Engine event counter when the snapshot was taken.
    pub events_processed: u64,
    pub state: SimState,
}

// ── Manager ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    ring: VecDeque<Snapshot>,
    capacity: usize,
    policy: CheckpointPolicy,
    next_id: u64,
}

impl CheckpointManager {
    /// A ring holding at most `capacity` snapshots (at least one).
    pub fn new(capacity: usize, policy: CheckpointPolicy) -> Self {
        let capacity = capacity.max(1);
        CheckpointManager {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            next_id: 0,
        }
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the policy asks for a snapshot before the next event.
    pub fn is_due(&self, events_processed: u64, now: SimTime) -> bool {
        match self.policy {
            CheckpointPolicy::Off => false,
            CheckpointPolicy::BeforeEachEvent => true,
            CheckpointPolicy::EveryEvents(0) => false,
            CheckpointPolicy::EveryEvents(n) => events_processed % n == 0,
            CheckpointPolicy::EveryInterval(secs) => match self.ring.back() {
                None => true,
                Some(last) => now
                    .duration_since(last.sim_time)
                    .map_or(false, |elapsed| elapsed >= secs),
            },
        }
    }

    /// Deep-copy `state` into the ring, evicting the oldest snapshot beyond
    /// capacity.
    pub fn checkpoint(&mut self, state: &SimState, events_processed: u64) -> SnapshotId {
        let id = SnapshotId(self.next_id);
        self.next_id += 1;
        if self.ring.len() == self.capacity {
            if let Some(evicted) = self.ring.pop_front() {
                debug!(id = %evicted.id, "checkpoint evicted");
            }
        }
        self.ring.push_back(Snapshot {
            id,
            created_at: crate::time::unix_millis(),
            sim_time: state.now(),
            events_processed,
            state: state.copy(),
        });
        debug!(id = %id, time = %state.now(), events_processed, "checkpoint taken");
        id
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.ring.iter().find(|s| s.id == id)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.ring.back()
    }

    /// A fresh copy of the state held by snapshot `id`. The snapshot stays in
    /// the ring.
    pub fn restore(&self, id: SnapshotId) -> Result<SimState, CheckpointError> {
        self.get(id)
            .map(|s| s.state.copy())
            .ok_or(CheckpointError::NotFound(id))
    }

    pub fn restore_latest(&self) -> Result<SimState, CheckpointError> {
        self.latest()
            .map(|s| s.state.copy())
            .ok_or(CheckpointError::Empty)
    }

    /// Ids of retained snapshots, oldest first.
    pub fn ids(&self) -> Vec<SnapshotId> {
        self.ring.iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Put a snapshot read from disk at the head of the ring. Its id is
    /// re-issued so ids stay monotonic.
    pub fn adopt(&mut self, mut snapshot: Snapshot) -> SnapshotId {
        let id = SnapshotId(self.next_id);
        self.next_id += 1;
        snapshot.id = id;
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(snapshot);
        id
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new(1, CheckpointPolicy::default())
    }
}

// ── Persistence ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format_version: u32,
    engine_version: String,
    id: SnapshotId,
    created_at: u64,
    sim_time: SimTime,
    events_processed: u64,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `snapshot` to `path`: a versioned header followed by the bincode
/// state blob. Conditional events are not persisted.
pub fn persist(snapshot: &Snapshot, path: &Path) -> Result<(), CheckpointError> {
    let dropped = snapshot.state.queue().conditional_len();
    if dropped > 0 {
        warn!(
            id = %snapshot.id,
            dropped,
            "conditional events are not persisted with checkpoints"
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let header = Header {
        format_version: CHECKPOINT_FORMAT_VERSION,
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        id: snapshot.id,
        created_at: snapshot.created_at,
        sim_time: snapshot.sim_time,
        events_processed: snapshot.events_processed,
    };
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&MAGIC).map_err(io_error(path))?;
    bincode::serialize_into(&mut writer, &header)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    bincode::serialize_into(&mut writer, &snapshot.state)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    writer.flush().map_err(io_error(path))?;
    info!(id = %snapshot.id, path = %path.display(), "checkpoint persisted");
    Ok(())
}

/// Read a snapshot written by [`persist`].
pub fn load(path: &Path) -> Result<Snapshot, CheckpointError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 4];
    if reader.read_exact(&mut magic).is_err() || magic != MAGIC {
        return Err(CheckpointError::BadMagic(path.to_path_buf()));
    }
    let header: Header = bincode::deserialize_from(&mut reader)
        .map_err(|e| CheckpointError::Deserialization(e.to_string()))?;
    if header.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(CheckpointError::IncompatibleVersion {
            found: header.format_version,
            expected: CHECKPOINT_FORMAT_VERSION,
        });
    }
    if header.engine_version != env!("CARGO_PKG_VERSION") {
        debug!(written_by = %header.engine_version, "checkpoint from another engine version");
    }
    let state: SimState = bincode::deserialize_from(&mut reader)
        .map_err(|e| CheckpointError::Deserialization(e.to_string()))?;
    Ok(Snapshot {
        id: header.id,
        created_at: header.created_at,
        sim_time: header.sim_time,
        events_processed: header.events_processed,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::priority;

    fn state_at(secs: f64) -> SimState {
        let mut s = SimState::new(SimTime::ZERO, SimTime::from_secs(100.0), "second");
        s.advance_time_if_needed(SimTime::from_secs(secs));
        s.set_object("t", secs);
        s
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let mut mgr = CheckpointManager::new(3, CheckpointPolicy::Off);
        for i in 0..10 {
            mgr.checkpoint(&state_at(i as f64), i);
            assert!(mgr.len() <= 3);
        }
        assert_eq!(mgr.ids(), vec![SnapshotId(7), SnapshotId(8), SnapshotId(9)]);
    }

    #[test]
    fn test_restore_latest_is_most_recent() {
        let n = 4;
        let mut mgr = CheckpointManager::new(n, CheckpointPolicy::Off);
        for i in 0..=n {
            mgr.checkpoint(&state_at(i as f64), i as u64);
        }
        let restored = mgr.restore_latest().unwrap();
        assert_eq!(restored.now(), SimTime::from_secs(n as f64));
        assert_eq!(restored.object("t"), Some(&crate::value::Value::Float(n as f64)));
    }

    #[test]
    fn test_evicted_snapshot_not_found() {
        let mut mgr = CheckpointManager::new(1, CheckpointPolicy::Off);
        let first = mgr.checkpoint(&state_at(1.0), 0);
        mgr.checkpoint(&state_at(2.0), 1);
        assert!(matches!(mgr.restore(first), Err(CheckpointError::NotFound(id)) if id == first));
        assert!(matches!(
            CheckpointManager::default().restore_latest(),
            Err(CheckpointError::Empty)
        ));
    }

    #[test]
    fn test_snapshot_is_independent_of_later_mutation() {
        let mut mgr = CheckpointManager::new(2, CheckpointPolicy::Off);
        let mut state = state_at(1.0);
        let id = mgr.checkpoint(&state, 0);
        state.set_object("t", 99.0);
        assert_eq!(
            mgr.restore(id).unwrap().object("t"),
            Some(&crate::value::Value::Float(1.0))
        );
    }

    #[test]
    fn test_policy_due() {
        let mut mgr = CheckpointManager::new(1, CheckpointPolicy::EveryEvents(3));
        assert!(mgr.is_due(0, SimTime::ZERO));
        assert!(!mgr.is_due(1, SimTime::ZERO));
        assert!(mgr.is_due(6, SimTime::ZERO));

        mgr = CheckpointManager::new(1, CheckpointPolicy::EveryInterval(10.0));
        assert!(mgr.is_due(0, SimTime::ZERO));
        mgr.checkpoint(&state_at(5.0), 0);
        assert!(!mgr.is_due(1, SimTime::from_secs(14.0)));
        assert!(mgr.is_due(1, SimTime::from_secs(15.0)));

        assert!(!CheckpointManager::new(1, CheckpointPolicy::Off).is_due(0, SimTime::ZERO));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt").join("latest.tsck");

        let mut state = state_at(3.0);
        state
            .schedule(SimTime::from_secs(5.0), "fire", "burn", priority::NORMAL)
            .unwrap();
        state.schedule_conditional("fire", "ignite", priority::NORMAL, |_| true);
        let mut mgr = CheckpointManager::new(1, CheckpointPolicy::Off);
        mgr.checkpoint(&state, 12);

        persist(mgr.latest().unwrap(), &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.events_processed, 12);
        assert_eq!(loaded.sim_time, SimTime::from_secs(3.0));
        assert_eq!(loaded.state.queue().len(), 1);
        assert_eq!(loaded.state.queue().conditional_len(), 0);
        assert_eq!(loaded.state.object("t"), state.object("t"));

        let adopted = mgr.adopt(loaded);
        assert_eq!(adopted, SnapshotId(1));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_load_rejects_other_versions_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.tsck");
        let header = Header {
            format_version: CHECKPOINT_FORMAT_VERSION + 1,
            engine_version: "0.0.0".into(),
            id: SnapshotId(0),
            created_at: 0,
            sim_time: SimTime::ZERO,
            events_processed: 0,
        };
        let mut bytes = MAGIC.to_vec();
        bytes.extend(bincode::serialize(&header).unwrap());
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            load(&path),
            Err(CheckpointError::IncompatibleVersion { found, .. }) if found == CHECKPOINT_FORMAT_VERSION + 1
        ));

        let junk = dir.path().join("junk.tsck");
        fs::write(&junk, b"not a checkpoint").unwrap();
        assert!(matches!(load(&junk), Err(CheckpointError::BadMagic(_))));
    }
}
