//! Write-through persistence for positions, swarm state and indicator history.
//!
//! The core calls a [`StateStore`] after every authoritative mutation and
//! only logs failures, so a broken store degrades the bot to memory-only
//! operation instead of stopping it.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::performance::PerformanceSnapshot;
use super::positions::Position;
use super::swarm::{AgentSnapshot, SwarmVote};

pub trait StateStore: Send + Sync {
    fn save_position(&self, position: &Position) -> Result<()>;
    fn get_open_positions(&self) -> Result<HashMap<String, Position>>;
    fn delete_position(&self, symbol: &str) -> Result<()>;

    fn append_closed_position(&self, position: &Position) -> Result<()>;
    fn get_closed_positions(&self) -> Result<Vec<Position>>;

    fn save_swarm_vote(&self, vote: &SwarmVote) -> Result<()>;

    fn save_worker_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()>;
    fn get_worker_snapshots(&self) -> Result<Vec<AgentSnapshot>>;

    fn save_worker_snapshots(&self, snapshots: &[AgentSnapshot]) -> Result<()> {
        snapshots.iter().try_for_each(|s| self.save_worker_snapshot(s))
    }

    fn save_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()>;
    fn get_performance(&self) -> Result<Option<PerformanceSnapshot>>;
}

const OPEN_POSITIONS: &str = "open_positions.json";
const CLOSED_POSITIONS: &str = "closed_positions.json";
const SWARM_VOTES: &str = "swarm_votes.jsonl";
const WORKERS: &str = "workers.json";
const PERFORMANCE: &str = "indicator_performance.json";

/// JSON documents under one state directory.
///
/// Whole-document files are replaced atomically (write to a temp file,
/// then rename). Swarm votes are appended as JSON lines.
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating state dir {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn update<T, F>(&self, name: &str, f: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let mut doc: T = self.read(name)?;
        f(&mut doc);
        self.write(name, &doc)
    }

    /// Swarm votes recorded so far, oldest first.
    pub fn read_swarm_votes(&self) -> Result<Vec<SwarmVote>> {
        let path = self.path(SWARM_VOTES);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("parsing swarm vote line"))
            .collect()
    }
}

impl StateStore for JsonFileStore {
    fn save_position(&self, position: &Position) -> Result<()> {
        self.update(OPEN_POSITIONS, |doc: &mut BTreeMap<String, Position>| {
            doc.insert(position.symbol.clone(), position.clone());
        })
    }

    fn get_open_positions(&self) -> Result<HashMap<String, Position>> {
        let doc: BTreeMap<String, Position> = self.read(OPEN_POSITIONS)?;
        Ok(doc.into_iter().collect())
    }

    fn delete_position(&self, symbol: &str) -> Result<()> {
        self.update(OPEN_POSITIONS, |doc: &mut BTreeMap<String, Position>| {
            doc.remove(symbol);
        })
    }

    fn append_closed_position(&self, position: &Position) -> Result<()> {
        self.update(CLOSED_POSITIONS, |doc: &mut Vec<Position>| {
            doc.push(position.clone());
        })
    }

    fn get_closed_positions(&self) -> Result<Vec<Position>> {
        self.read(CLOSED_POSITIONS)
    }

    fn save_swarm_vote(&self, vote: &SwarmVote) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(SWARM_VOTES))?;
        writeln!(file, "{}", serde_json::to_string(vote)?)?;
        Ok(())
    }

    fn save_worker_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()> {
        self.save_worker_snapshots(std::slice::from_ref(snapshot))
    }

    fn save_worker_snapshots(&self, snapshots: &[AgentSnapshot]) -> Result<()> {
        self.update(WORKERS, |doc: &mut BTreeMap<u32, AgentSnapshot>| {
            for s in snapshots {
                doc.insert(s.id, s.clone());
            }
        })
    }

    fn get_worker_snapshots(&self) -> Result<Vec<AgentSnapshot>> {
        let doc: BTreeMap<u32, AgentSnapshot> = self.read(WORKERS)?;
        Ok(doc.into_values().collect())
    }

    fn save_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        self.write(PERFORMANCE, snapshot)
    }

    fn get_performance(&self) -> Result<Option<PerformanceSnapshot>> {
        if !self.path(PERFORMANCE).exists() {
            return Ok(None);
        }
        self.read::<PerformanceSnapshot>(PERFORMANCE).map(Some)
    }
}

#[derive(Default)]
struct MemoryState {
    open: HashMap<String, Position>,
    closed: Vec<Position>,
    votes: Vec<SwarmVote>,
    workers: BTreeMap<u32, AgentSnapshot>,
    performance: Option<PerformanceSnapshot>,
}

/// Process-local store, used when no state directory is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> Result<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow!("memory store poisoned: {e}"))?;
        Ok(f(&mut state))
    }

    pub fn swarm_votes(&self) -> Vec<SwarmVote> {
        self.with(|s| s.votes.clone()).unwrap_or_default()
    }
}

impl StateStore for MemoryStore {
    fn save_position(&self, position: &Position) -> Result<()> {
        self.with(|s| {
            s.open.insert(position.symbol.clone(), position.clone());
        })
    }

    fn get_open_positions(&self) -> Result<HashMap<String, Position>> {
        self.with(|s| s.open.clone())
    }

    fn delete_position(&self, symbol: &str) -> Result<()> {
        self.with(|s| {
            s.open.remove(symbol);
        })
    }

    fn append_closed_position(&self, position: &Position) -> Result<()> {
        self.with(|s| s.closed.push(position.clone()))
    }

    fn get_closed_positions(&self) -> Result<Vec<Position>> {
        self.with(|s| s.closed.clone())
    }

    fn save_swarm_vote(&self, vote: &SwarmVote) -> Result<()> {
        self.with(|s| s.votes.push(vote.clone()))
    }

    fn save_worker_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()> {
        self.with(|s| {
            s.workers.insert(snapshot.id, snapshot.clone());
        })
    }

    fn get_worker_snapshots(&self) -> Result<Vec<AgentSnapshot>> {
        self.with(|s| s.workers.values().cloned().collect())
    }

    fn save_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        self.with(|s| s.performance = Some(snapshot.clone()))
    }

    fn get_performance(&self) -> Result<Option<PerformanceSnapshot>> {
        self.with(|s| s.performance.clone())
    }
}
