use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::datastore::{AppState, STORAGE_KEY, Storage, decode_state, encode_state};
use crate::settings::{AppSettings, SettingsPatch};
use crate::task::{NewTask, Task, TaskId};

/// Owns the task collection and settings.
///
/// Every mutation is applied to memory first and then written through the
/// storage backend. A failed write is logged and counted; it never undoes the
/// in-memory change. Operations addressing an unknown id do nothing and
/// report `false`.
///
/// When stored state exists but could neither be read nor moved aside, the
/// store runs read-only: changes stay in memory and nothing is written over
/// the original record.
#[derive(Debug)]
pub struct TaskStore<S: Storage> {
    storage: S,
    state: AppState,
    persist_failures: u64,
    read_only: bool,
    unsaved: bool,
}

impl<S: Storage> TaskStore<S> {
    /// Loads persisted state, falling back to an empty store when nothing is
    /// stored or the stored record cannot be read.
    #[tracing::instrument(skip(storage, now))]
    pub fn hydrate(storage: S, now: DateTime<Utc>) -> Self {
        let mut read_only = false;
        let state = match storage.load(STORAGE_KEY).and_then(|raw| {
            raw.map(|raw| decode_state(&raw)).transpose()
        }) {
            Ok(Some(state)) => {
                info!(tasks = state.tasks.len(), "restored persisted state");
                state
            }
            Ok(None) => {
                debug!("no persisted state; starting empty");
                Self::initial_state(now)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "persisted state unreadable; starting empty");
                if let Err(err) = storage.quarantine(STORAGE_KEY) {
                    warn!(
                        error = %format!("{err:#}"),
                        "failed to set unreadable state aside; store is read-only"
                    );
                    read_only = true;
                }
                Self::initial_state(now)
            }
        };

        Self {
            storage,
            state,
            persist_failures: 0,
            read_only,
            unsaved: false,
        }
    }

    fn initial_state(now: DateTime<Utc>) -> AppState {
        AppState {
            tasks: vec![],
            settings: AppSettings::initial(now),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.state.tasks
    }

    pub fn settings(&self) -> &AppSettings {
        &self.state.settings
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.state.tasks.iter().find(|t| t.id == id)
    }

    /// Number of writes that failed since the store was opened.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True when the last change never reached storage.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    #[tracing::instrument(skip(self, input, now), fields(title = %input.title))]
    pub fn add_task(&mut self, input: NewTask, now: DateTime<Utc>) -> Task {
        let task = Task::from_input(input, now);
        info!(id = %task.id, missed = task.missed, "task added");
        self.state.tasks.push(task.clone());
        self.persist();
        task
    }

    /// Replaces the stored task with the same id. `missed` is recomputed from
    /// the supplied deadline; every other field is taken as given.
    #[tracing::instrument(skip(self, task, now), fields(id = %task.id))]
    pub fn update_task(&mut self, mut task: Task, now: DateTime<Utc>) -> bool {
        let Some(slot) = self.state.tasks.iter_mut().find(|t| t.id == task.id) else {
            debug!("update for unknown task ignored");
            return false;
        };

        task.missed = task.deadline < now;
        info!(missed = task.missed, completed = task.completed, "task updated");
        *slot = task;
        self.persist();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, id: TaskId) -> bool {
        let before = self.state.tasks.len();
        self.state.tasks.retain(|t| t.id != id);
        if self.state.tasks.len() == before {
            debug!("delete for unknown task ignored");
            return false;
        }

        info!("task deleted");
        self.persist();
        true
    }

    /// Flips `completed`. Leaves `missed` and the deadline untouched.
    #[tracing::instrument(skip(self))]
    pub fn complete_task(&mut self, id: TaskId) -> bool {
        let Some(task) = self.state.tasks.iter_mut().find(|t| t.id == id) else {
            debug!("completion toggle for unknown task ignored");
            return false;
        };

        task.completed = !task.completed;
        info!(completed = task.completed, "task completion toggled");
        self.persist();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn update_settings(&mut self, patch: SettingsPatch) {
        if patch.is_empty() {
            debug!("empty settings patch ignored");
            return;
        }
        self.state.settings.merge(patch);
        info!(theme = %self.state.settings.theme, "settings updated");
        self.persist();
    }

    /// Writes the current state, surfacing any error to the caller.
    #[tracing::instrument(skip(self))]
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.read_only {
            return Err(anyhow!(
                "stored state could not be read or moved aside; not overwriting it"
            ));
        }
        let payload = encode_state(&self.state)?;
        self.storage.save(STORAGE_KEY, &payload)?;
        self.unsaved = false;
        Ok(())
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn persist(&mut self) {
        if let Err(err) = self.flush() {
            self.unsaved = true;
            self.persist_failures += 1;
            warn!(
                error = %format!("{err:#}"),
                failures = self.persist_failures,
                "failed to persist state; keeping in-memory changes"
            );
        }
    }
}
