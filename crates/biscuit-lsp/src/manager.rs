//! One connection per language, started lazily.
//!
//! - Picks the server for a document by file extension
//! - Deduplicates concurrent starts of the same server
//! - Remembers languages whose server failed so it is not retried
//! - Routes requests to the connection owning the document

use crate::config::{default_configs, LspConfig};
use crate::connection::Connection;
use crate::dispatcher::ConnectionState;
use crate::document::{Document, DocumentId};
use crate::error::{LspError, LspResult};
use crate::pending::RequestId;
use crate::position::TextPosition;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Server status for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LspStatus {
    pub language: String,
    pub command: String,
    pub status: LspServerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LspServerStatus {
    Running(ConnectionState),
    Broken,
    NotStarted,
}

/// Manages language server connections for an editor session.
pub struct LspManager {
    configs: Vec<LspConfig>,
    /// Fallback workspace root when no root pattern matches.
    project_root: PathBuf,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    /// Languages whose server failed to start or died.
    broken: RwLock<HashSet<String>>,
    /// Starts in progress, so concurrent callers share one server.
    spawning: Mutex<HashMap<String, Arc<Notify>>>,
    /// Language owning each open document.
    documents: RwLock<HashMap<DocumentId, String>>,
}

impl LspManager {
    pub fn new(configs: Vec<LspConfig>, project_root: PathBuf) -> Self {
        Self {
            configs,
            project_root,
            connections: RwLock::new(HashMap::new()),
            broken: RwLock::new(HashSet::new()),
            spawning: Mutex::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults(project_root: PathBuf) -> Self {
        Self::new(default_configs(), project_root)
    }

    pub fn configs(&self) -> &[LspConfig] {
        &self.configs
    }

    /// The configuration that would serve `path`.
    pub fn config_for_path(&self, path: &Path) -> Option<&LspConfig> {
        self.configs.iter().find(|c| c.handles_path(path))
    }

    /// Open a document, starting its language server if needed.
    ///
    /// When no server can be used the document's `lsp_unavailable` sink is
    /// called and the error returned. The document keeps working without
    /// code intelligence.
    pub async fn open_document(&self, document: Arc<dyn Document>) -> LspResult<()> {
        let Some(path) = document.path() else {
            document.lsp_unavailable("plaintext");
            return Err(LspError::NoServerForFile(document.id().to_string()));
        };
        let Some(config) = self.config_for_path(&path).cloned() else {
            let language = crate::config::language_id_for_path(&path).unwrap_or("plaintext");
            document.lsp_unavailable(language);
            return Err(LspError::NoServerForFile(path.display().to_string()));
        };

        let connection = match self.connection_for_config(&config, &path).await {
            Ok(connection) => connection,
            Err(e) => {
                document.lsp_unavailable(&config.language);
                return Err(e);
            }
        };

        let id = document.id();
        connection.open_document(document).await?;
        self.documents
            .write()
            .await
            .insert(id, config.language.clone());
        debug!(document = %id, language = %config.language, "Document opened");
        Ok(())
    }

    /// Get or start the connection for `config`.
    async fn connection_for_config(
        &self,
        config: &LspConfig,
        file_path: &Path,
    ) -> LspResult<Arc<Connection>> {
        let key = config.language.clone();
        loop {
            if self.broken.read().await.contains(&key) {
                return Err(LspError::NoServerForFile(format!(
                    "{} ({} server unavailable)",
                    file_path.display(),
                    key
                )));
            }

            if let Some(connection) = self.live_connection(&key).await {
                return Ok(connection);
            }

            {
                let mut spawning = self.spawning.lock().await;
                if let Some(notify) = spawning.get(&key).cloned() {
                    // Register before releasing the lock so the wakeup can't be missed.
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(spawning);
                    notified.await;
                    continue;
                }
                spawning.insert(key.clone(), Arc::new(Notify::new()));
            }

            let root = config
                .find_workspace_root(file_path)
                .unwrap_or_else(|| self.project_root.clone());
            let started = match Connection::start(config, &root) {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    self.connections
                        .write()
                        .await
                        .insert(key.clone(), Arc::clone(&connection));
                    Ok(connection)
                }
                Err(e) => {
                    error!(language = %key, command = %config.command, error = %e, "Failed to start language server");
                    self.broken.write().await.insert(key.clone());
                    Err(e)
                }
            };

            if let Some(notify) = self.spawning.lock().await.remove(&key) {
                notify.notify_waiters();
            }
            return started;
        }
    }

    /// A connection that has not closed. Closed connections are dropped and
    /// their language marked broken.
    async fn live_connection(&self, language: &str) -> Option<Arc<Connection>> {
        let connection = self.connections.read().await.get(language).cloned()?;
        if connection.state() != ConnectionState::Closed {
            return Some(connection);
        }
        warn!(language = %language, "Language server closed, not restarting");
        self.connections.write().await.remove(language);
        self.broken.write().await.insert(language.to_string());
        None
    }

    async fn connection_for_document(&self, document: DocumentId) -> LspResult<Arc<Connection>> {
        let language = self
            .documents
            .read()
            .await
            .get(&document)
            .cloned()
            .ok_or(LspError::DocumentNotOpen(document))?;
        self.connections
            .read()
            .await
            .get(&language)
            .cloned()
            .ok_or(LspError::DocumentNotOpen(document))
    }

    /// The connection serving `language`, if one was started.
    pub async fn connection(&self, language: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(language).cloned()
    }

    /// Wait until the server for `document` is ready.
    pub async fn wait_ready(&self, document: DocumentId, timeout: Duration) -> LspResult<()> {
        self.connection_for_document(document)
            .await?
            .wait_ready(timeout)
            .await
    }

    pub async fn request_completion(
        &self,
        document: DocumentId,
        cursor: TextPosition,
    ) -> LspResult<RequestId> {
        self.connection_for_document(document)
            .await?
            .request_completion(document, cursor)
            .await
    }

    pub async fn request_definition(
        &self,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        self.connection_for_document(document)
            .await?
            .request_definition(document, position)
            .await
    }

    pub async fn request_hover(
        &self,
        document: DocumentId,
        position: TextPosition,
    ) -> LspResult<RequestId> {
        self.connection_for_document(document)
            .await?
            .request_hover(document, position)
            .await
    }

    /// Close a document on its server. Returns how many pending requests
    /// were dropped.
    pub async fn close_document(&self, document: DocumentId) -> usize {
        let Some(language) = self.documents.write().await.remove(&document) else {
            return 0;
        };
        match self.connection(&language).await {
            Some(connection) => connection.close_document(document).await,
            None => 0,
        }
    }

    /// Shut every server down.
    pub async fn shutdown_all(&self, timeout: Duration) {
        let connections: Vec<_> = self.connections.write().await.drain().collect();
        for (language, connection) in connections {
            match connection.shutdown(timeout).await {
                Ok(()) => info!(language = %language, "Language server stopped"),
                Err(e) => warn!(language = %language, error = %e, "Language server shutdown failed"),
            }
        }
        self.documents.write().await.clear();
    }

    /// Status of every configured server.
    pub async fn status(&self) -> Vec<LspStatus> {
        let connections = self.connections.read().await;
        let broken = self.broken.read().await;
        self.configs
            .iter()
            .filter(|c| c.enabled)
            .map(|config| {
                let status = if broken.contains(&config.language) {
                    LspServerStatus::Broken
                } else if let Some(connection) = connections.get(&config.language) {
                    LspServerStatus::Running(connection.state())
                } else {
                    LspServerStatus::NotStarted
                };
                LspStatus {
                    language: config.language.clone(),
                    command: config.command.clone(),
                    status,
                }
            })
            .collect()
    }
}
