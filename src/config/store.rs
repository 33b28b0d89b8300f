//! Loading, mutating and saving the server's configuration document.
//!
//! The document is schema'd: every field has a known type and a default, and
//! the root object is tagged with the product name and a format version.
//! Mutations do not hit the disk immediately; they are debounced through a
//! small dispatch delay so a burst of administrator changes becomes one
//! write.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slog::Logger;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::{Group, User};
use crate::options::TlsMode;

/// The product tag expected at the document root.
pub const PRODUCT_TAG: &str = "ironftpd";
/// The current document format version.
pub const FORMAT_VERSION: u32 = 1;

const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(500);

/// A configuration load/save failure, with enough context to point the
/// administrator at the offending element.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config I/O on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The document does not parse or violates the schema.
    #[error("config parse in {path}: {detail}")]
    Parse {
        /// The file involved.
        path: PathBuf,
        /// Parser diagnostics, including position.
        detail: String,
    },
    /// The document belongs to a different product or a newer format.
    #[error("config {path} has tag {tag:?} version {version}, expected {expected_tag:?} <= {expected_version}")]
    WrongFlavour {
        /// The file involved.
        path: PathBuf,
        /// The tag found.
        tag: String,
        /// The version found.
        version: u32,
        /// What we expected.
        expected_tag: &'static str,
        /// The newest version we read.
        expected_version: u32,
    },
}

/// One configured control-channel listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind.
    pub address: String,
    /// Port to bind.
    pub port: u16,
    /// TLS behaviour on this endpoint.
    #[serde(default)]
    pub tls_mode: TlsMode,
}

/// The whole persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Product tag; must match [`PRODUCT_TAG`].
    pub product: String,
    /// Format version; must not exceed [`FORMAT_VERSION`].
    pub version: u32,
    /// Listener endpoints.
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    /// Accounts.
    #[serde(default)]
    pub users: Vec<User>,
    /// Groups.
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        ConfigDocument {
            product: PRODUCT_TAG.to_string(),
            version: FORMAT_VERSION,
            listeners: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
        }
    }
}

/// The store: an in-memory document plus a debounced writer.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    document: Arc<RwLock<ConfigDocument>>,
    save_tx: mpsc::UnboundedSender<()>,
    logger: Logger,
}

impl Store {
    /// Opens (or initializes) the store at `path` and starts the debounced
    /// writer task on the current runtime.
    pub fn open(path: impl Into<PathBuf>, logger: Logger) -> Result<Store, ConfigError> {
        Self::open_with_delay(path, logger, DEFAULT_SAVE_DELAY)
    }

    /// Like [`Store::open`], with an explicit dispatch delay.
    pub fn open_with_delay(path: impl Into<PathBuf>, logger: Logger, delay: Duration) -> Result<Store, ConfigError> {
        let path = path.into();
        let document = Arc::new(RwLock::new(Self::load(&path)?));

        let (save_tx, mut save_rx) = mpsc::unbounded_channel::<()>();
        {
            let document = document.clone();
            let path = path.clone();
            let logger = logger.clone();
            tokio::spawn(async move {
                while save_rx.recv().await.is_some() {
                    // Batch whatever else arrives within the dispatch delay.
                    tokio::time::sleep(delay).await;
                    while save_rx.try_recv().is_ok() {}

                    let snapshot = document.read().expect("config lock").clone();
                    if let Err(e) = Self::write(&path, &snapshot) {
                        slog::error!(logger, "failed to persist configuration"; "error" => %e);
                    } else {
                        slog::debug!(logger, "configuration persisted"; "path" => %path.display());
                    }
                }
            });
        }

        Ok(Store {
            path,
            document,
            save_tx,
            logger,
        })
    }

    fn load(path: &Path) -> Result<ConfigDocument, ConfigError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigDocument::default()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let doc: ConfigDocument = serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        if doc.product != PRODUCT_TAG || doc.version > FORMAT_VERSION {
            return Err(ConfigError::WrongFlavour {
                path: path.to_path_buf(),
                tag: doc.product,
                version: doc.version,
                expected_tag: PRODUCT_TAG,
                expected_version: FORMAT_VERSION,
            });
        }

        Ok(doc)
    }

    fn write(path: &Path, doc: &ConfigDocument) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(doc).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            }
        }
        std::fs::write(path, json).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reads the current document.
    pub fn document(&self) -> ConfigDocument {
        self.document.read().expect("config lock").clone()
    }

    /// Applies a mutation and schedules a batched save.
    pub fn update<F: FnOnce(&mut ConfigDocument)>(&self, mutate: F) {
        mutate(&mut self.document.write().expect("config lock"));
        self.schedule_save();
    }

    /// Requests a batched save of the current state.
    pub fn schedule_save(&self) {
        if self.save_tx.send(()).is_err() {
            slog::warn!(self.logger, "configuration writer is gone; changes will not persist");
        }
    }

    /// Writes the current state out immediately, bypassing the delay.
    /// For shutdown paths.
    pub fn save_now(&self) -> Result<(), ConfigError> {
        let snapshot = self.document();
        Self::write(&self.path, &snapshot)
    }

    /// The channel end the authenticator uses to request saves (e.g. after a
    /// password hash upgrade).
    pub fn save_notifier(&self) -> mpsc::UnboundedSender<()> {
        self.save_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("config.json"), test_logger()).unwrap();
        let doc = store.document();
        assert_eq!(doc.product, PRODUCT_TAG);
        assert!(doc.users.is_empty());
    }

    #[tokio::test]
    async fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = Store::open(&path, test_logger()).unwrap();
        store.update(|doc| {
            doc.users.push(User::with_password("alice", "pw"));
            doc.listeners.push(ListenerConfig {
                address: "0.0.0.0".into(),
                port: 21,
                tls_mode: TlsMode::AllowTls,
            });
        });
        store.save_now().unwrap();

        let reloaded = Store::open(&path, test_logger()).unwrap().document();
        assert_eq!(reloaded.users.len(), 1);
        assert_eq!(reloaded.users[0].name, "alice");
        assert_eq!(reloaded.listeners[0].tls_mode, TlsMode::AllowTls);
    }

    #[tokio::test(start_paused = true)]
    async fn saves_are_debounced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = Store::open_with_delay(&path, test_logger(), Duration::from_millis(500)).unwrap();

        store.update(|doc| doc.users.push(User::with_password("a", "x")));
        store.update(|doc| doc.users.push(User::with_password("b", "x")));
        store.update(|doc| doc.users.push(User::with_password("c", "x")));

        // Nothing on disk before the dispatch delay elapses.
        assert!(!path.exists());

        tokio::time::advance(Duration::from_millis(600)).await;
        // Give the writer task a chance to run after the timer fires.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let written = Store::open(&path, test_logger()).unwrap().document();
        assert_eq!(written.users.len(), 3);
    }

    #[tokio::test]
    async fn foreign_document_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "product": "otherd", "version": 1 }"#).unwrap();

        match Store::open(&path, test_logger()) {
            Err(ConfigError::WrongFlavour { tag, .. }) => assert_eq!(tag, "otherd"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn parse_error_carries_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        match Store::open(&path, test_logger()) {
            Err(ConfigError::Parse { detail, .. }) => assert!(detail.contains("line")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
