//! Process-wide user settings with change notification.
//!
//! Settings are read synchronously by every new job; a snapshot is taken at
//! the start of a run, so a mid-run change never affects an in-flight job.
//! All public operations are non-suspending - the inner lock is never held
//! across an await point.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::gateway::BackendKind;

/// Where streamed summaries are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Tooltip,
    Sidepanel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub backend_choice: BackendKind,
    pub custom_prompt: String,
    pub display_mode: DisplayMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_choice: BackendKind::Extractive,
            custom_prompt: "Summarize this article in 2-3 sentences".to_string(),
            display_mode: DisplayMode::Tooltip,
        }
    }
}

/// Partial settings update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub backend_choice: Option<BackendKind>,
    pub custom_prompt: Option<String>,
    pub display_mode: Option<DisplayMode>,
}

/// Settings store persisted as JSON, with watch-channel change notification
/// so every open surface observes writes.
pub struct SettingsStore {
    path: Option<PathBuf>,
    state: Mutex<Settings>,
    notify: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Load from `path`, falling back to defaults on a missing or corrupt
    /// file. Persistence is best-effort throughout.
    pub fn load(path: &Path) -> Self {
        let settings = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt settings file, using defaults");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        let (notify, _) = watch::channel(settings.clone());
        Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(settings),
            notify,
        }
    }

    /// In-memory store, not persisted. Used by tests.
    pub fn ephemeral(settings: Settings) -> Self {
        let (notify, _) = watch::channel(settings.clone());
        Self {
            path: None,
            state: Mutex::new(settings),
            notify,
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.state.lock().expect("settings lock poisoned").clone()
    }

    /// Apply a patch, persist, and notify watchers. Returns the new value.
    pub fn update(&self, patch: SettingsPatch) -> Settings {
        let updated = {
            let mut state = self.state.lock().expect("settings lock poisoned");
            if let Some(backend_choice) = patch.backend_choice {
                state.backend_choice = backend_choice;
            }
            if let Some(custom_prompt) = patch.custom_prompt {
                state.custom_prompt = custom_prompt;
            }
            if let Some(display_mode) = patch.display_mode {
                state.display_mode = display_mode;
            }
            state.clone()
        };

        if let Some(path) = &self.path {
            match serde_json::to_string_pretty(&updated) {
                Ok(raw) => {
                    if let Err(e) = std::fs::write(path, raw) {
                        warn!(path = %path.display(), error = %e, "Failed to persist settings");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize settings"),
            }
        }

        let _ = self.notify.send(updated.clone());
        updated
    }

    /// Subscribe to settings changes.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(&dir.path().join("settings.json"));
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::load(&path);
        store.update(SettingsPatch {
            backend_choice: Some(BackendKind::Generative),
            custom_prompt: Some("One sentence only".to_string()),
            display_mode: None,
        });

        let reloaded = SettingsStore::load(&path);
        let settings = reloaded.get();
        assert_eq!(settings.backend_choice, BackendKind::Generative);
        assert_eq!(settings.custom_prompt, "One sentence only");
        assert_eq!(settings.display_mode, DisplayMode::Tooltip);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::load(&path);
        assert_eq!(store.get(), Settings::default());
    }

    #[tokio::test]
    async fn watchers_observe_updates() {
        let store = SettingsStore::ephemeral(Settings::default());
        let mut rx = store.subscribe();

        store.update(SettingsPatch {
            backend_choice: Some(BackendKind::Generative),
            ..Default::default()
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().backend_choice, BackendKind::Generative);
    }
}
