//! Local persistence of the application state
//!
//! The whole [`AppState`] is stored as a single JSON blob under a fixed key:
//! `~/.local/share/dailyflow/dailyflow_state.json`. It is loaded at startup
//! and written back after every change.

use std::path::{Path, PathBuf};

pub use crate::model::AppState;

/// Fixed storage key of the state blob
pub const STORAGE_KEY: &str = "dailyflow_state";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Could not determine data directory")]
    NoDataDir,
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed state store
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store in the user's local data directory
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::data_local_dir()
            .ok_or(StoreError::NoDataDir)?
            .join("dailyflow");
        Ok(Self::in_dir(dir))
    }

    /// Store under `dir/<STORAGE_KEY>.json`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved state. A missing or unreadable blob yields the default
    /// state rather than an error.
    pub fn load(&self) -> AppState {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<AppState>(&contents) {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Store: failed to parse {:?}: {}", self.path, e);
                    AppState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppState::default(),
            Err(e) => {
                log::warn!("Store: failed to read {:?}: {}", self.path, e);
                AppState::default()
            }
        }
    }

    /// Replace the saved state
    pub fn save(&self, state: &AppState) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(state)?;
        write_atomic(&self.path, &contents)?;
        log::debug!("Store: saved state to {:?}", self.path);
        Ok(())
    }

    /// Load, apply `f`, and save
    pub fn update<F>(&self, f: F) -> Result<AppState, StoreError>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.load();
        f(&mut state);
        self.save(&state)?;
        Ok(state)
    }
}

/// Write `contents` to `path` through a temp file in the same directory, then
/// rename it over the destination. Creates missing parent directories.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents).map_err(io_err(&tmp_path))?;

    // rename fails on Windows when the destination exists
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(io_err(path))
}
