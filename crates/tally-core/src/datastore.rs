use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::settings::AppSettings;
use crate::task::Task;

/// Fixed key the whole app state is stored under.
pub const STORAGE_KEY: &str = "task-manager-storage";

pub const STATE_VERSION: u32 = 0;

/// Everything the store persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub settings: AppSettings,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<S> {
    state: S,
    #[serde(default)]
    version: u32,
}

pub fn encode_state(state: &AppState) -> anyhow::Result<String> {
    let envelope = Envelope {
        state,
        version: STATE_VERSION,
    };
    serde_json::to_string(&envelope).context("failed to serialize app state")
}

pub fn decode_state(raw: &str) -> anyhow::Result<AppState> {
    let envelope: Envelope<AppState> =
        serde_json::from_str(raw).context("failed to parse app state")?;
    if envelope.version != STATE_VERSION {
        warn!(
            found = envelope.version,
            expected = STATE_VERSION,
            "persisted state has unexpected version; loading as-is"
        );
    }
    Ok(envelope.state)
}

/// Key/value blob storage the task store persists through.
pub trait Storage {
    fn load(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn save(&self, key: &str, payload: &str) -> anyhow::Result<()>;

    /// Moves an unreadable payload out of the way so the next save does not
    /// overwrite it.
    fn quarantine(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct FileStorage {
    pub data_dir: PathBuf,
}

impl FileStorage {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened file storage");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }

    /// `<key>.json.corrupt`, or `<key>.json.corrupt.N` with the first free N
    /// so earlier copies are kept.
    fn quarantine_path_for(&self, key: &str) -> PathBuf {
        let base = self.data_dir.join(format!("{key}.json.corrupt"));
        if !base.exists() {
            return base;
        }
        (1u32..)
            .map(|n| self.data_dir.join(format!("{key}.json.corrupt.{n}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }
}

impl Storage for FileStorage {
    #[tracing::instrument(skip(self))]
    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(file = %path.display(), "no persisted state yet");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        debug!(file = %path.display(), bytes = raw.len(), "read persisted state");
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, payload))]
    fn save(&self, key: &str, payload: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        debug!(file = %path.display(), bytes = payload.len(), "saving state atomically");

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(payload.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn quarantine(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }
        let aside = self.quarantine_path_for(key);
        fs::rename(&path, &aside).with_context(|| {
            format!("failed to move {} to {}", path.display(), aside.display())
        })?;
        warn!(
            file = %path.display(),
            moved_to = %aside.display(),
            "moved unreadable state file aside"
        );
        Ok(())
    }
}

/// Process-local storage, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, String>>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose every `save` fails.
    pub fn failing() -> Self {
        Self {
            entries: RefCell::default(),
            fail_writes: true,
        }
    }

    pub fn with_entry(key: &str, payload: &str) -> Self {
        let storage = Self::new();
        storage
            .entries
            .borrow_mut()
            .insert(key.to_string(), payload.to_string());
        storage
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, payload: &str) -> anyhow::Result<()> {
        if self.fail_writes {
            return Err(anyhow!("storage is read-only"));
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn quarantine(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.borrow_mut();
        if let Some(raw) = entries.remove(key) {
            entries.insert(format!("{key}.corrupt"), raw);
        }
        Ok(())
    }
}
