use crate::model_service::{LoadError, ModelHandle, ModelSource};
use parking_lot::RwLock;
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use tokio::sync::Mutex;

pub type SharedHandle<M> = Arc<ModelHandle<<M as ModelSource>::Model>>;

enum LoadState<M: ModelSource> {
    Unloaded,
    Loading,
    Loaded(SharedHandle<M>),
    Failed { attempts: u32, error: LoadError },
}

/// Snapshot of the loader state machine.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LoaderStatus {
    Unloaded,
    Loading,
    Loaded { model: String },
    Failed { attempts: u32, error: String },
}

/// Lazily builds the model handle exactly once.
///
/// The state is read without the load lock first; callers that miss run the
/// load on a spawned task that takes the lock and checks again, so concurrent
/// first requests wait for a single load. The task commits its result even if
/// every caller has gone away. A failed load leaves the loader retryable.
pub struct ModelLoader<M: ModelSource> {
    inner: Arc<LoaderInner<M>>,
}

struct LoaderInner<M: ModelSource> {
    source: Arc<M>,
    state: RwLock<LoadState<M>>,
    load_lock: Mutex<()>,
}

impl<M: ModelSource> ModelLoader<M> {
    pub fn new(source: M) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                source: Arc::new(source),
                state: RwLock::new(LoadState::Unloaded),
                load_lock: Mutex::new(()),
            }),
        }
    }

    pub async fn ensure_loaded(&self) -> Result<SharedHandle<M>, LoadError> {
        if let Some(handle) = self.inner.loaded() {
            return Ok(handle);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.load_once().await })
            .await
            .unwrap_or_else(|e| Err(LoadError::Task(e.to_string())))
    }

    pub fn status(&self) -> LoaderStatus {
        match &*self.inner.state.read() {
            LoadState::Unloaded => LoaderStatus::Unloaded,
            LoadState::Loading => LoaderStatus::Loading,
            LoadState::Loaded(handle) => LoaderStatus::Loaded {
                model: handle.identifier.clone(),
            },
            LoadState::Failed { attempts, error } => LoaderStatus::Failed {
                attempts: *attempts,
                error: error.to_string(),
            },
        }
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded().is_some()
    }
}

impl<M: ModelSource> LoaderInner<M> {
    fn loaded(&self) -> Option<SharedHandle<M>> {
        match &*self.state.read() {
            LoadState::Loaded(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    async fn load_once(&self) -> Result<SharedHandle<M>, LoadError> {
        let _guard = self.load_lock.lock().await;
        if let Some(handle) = self.loaded() {
            return Ok(handle);
        }

        let previous_attempts = {
            let mut state = self.state.write();
            let attempts = match &*state {
                LoadState::Failed { attempts, .. } => *attempts,
                _ => 0,
            };
            *state = LoadState::Loading;
            attempts
        };

        let started = Instant::now();
        let source = self.source.clone();
        let result = tokio::task::spawn_blocking(move || source.load())
            .await
            .unwrap_or_else(|e| Err(LoadError::Task(e.to_string())));

        match result {
            Ok(handle) => {
                let handle = Arc::new(handle);
                tracing::info!(
                    "Model {} loaded in {} ms",
                    handle.identifier,
                    started.elapsed().as_millis()
                );
                *self.state.write() = LoadState::Loaded(handle.clone());
                Ok(handle)
            }
            Err(error) => {
                let attempts = previous_attempts + 1;
                tracing::error!("Model load attempt {} failed: {}", attempts, error);
                *self.state.write() = LoadState::Failed {
                    attempts,
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }
}
