//! Copy-on-write application state.
//!
//! A [`StateStore`] hands out `Arc` snapshots. Updates build a new value from
//! the current one and swap it in, so a reader holding a snapshot never sees
//! a half-applied change. Persistence is optional and injected through
//! [`PersistencePort`].
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait PersistencePort<T>: Send + Sync {
    /// The stored value, or `None` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<T>, PersistenceError>;

    async fn save(&self, value: &T) -> Result<(), PersistenceError>;
}

/// Stores a value as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> PersistencePort<T> for JsonFilePersistence
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self) -> Result<Option<T>, PersistenceError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn save(&self, value: &T) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

pub struct StateStore<T> {
    current: RwLock<Arc<T>>,
    persistence: Option<Arc<dyn PersistencePort<T>>>,
}

impl<T: Send + Sync + 'static> StateStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            persistence: None,
        }
    }

    /// Every update is written through `persistence` after it is applied.
    pub fn with_persistence(initial: T, persistence: Arc<dyn PersistencePort<T>>) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            persistence: Some(persistence),
        }
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current value with one derived from it.
    pub async fn update(&self, f: impl FnOnce(&T) -> T) -> Result<Arc<T>, PersistenceError> {
        let next = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let next = Arc::new(f(&current));
            *current = next.clone();
            next
        };
        self.persist(&next).await?;
        Ok(next)
    }

    pub async fn replace(&self, value: T) -> Result<Arc<T>, PersistenceError> {
        self.update(|_| value).await
    }

    async fn persist(&self, value: &T) -> Result<(), PersistenceError> {
        match &self.persistence {
            Some(port) => port.save(value).await,
            None => Ok(()),
        }
    }
}

impl<T: Default + Send + Sync + 'static> Default for StateStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    #[derive(Default)]
    struct RecordingPort {
        saved: Mutex<Vec<Counter>>,
    }

    #[async_trait]
    impl PersistencePort<Counter> for RecordingPort {
        async fn load(&self) -> Result<Option<Counter>, PersistenceError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }

        async fn save(&self, value: &Counter) -> Result<(), PersistenceError> {
            self.saved.lock().unwrap().push(value.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn snapshots_are_not_affected_by_updates() {
        let store = StateStore::new(Counter { value: 1 });
        let before = store.snapshot();

        store
            .update(|c| Counter { value: c.value + 1 })
            .await
            .unwrap();

        assert_eq!(before.value, 1);
        assert_eq!(store.snapshot().value, 2);
    }

    #[tokio::test]
    async fn updates_are_written_through() {
        let port = Arc::new(RecordingPort::default());
        let store = StateStore::with_persistence(Counter::default(), port.clone());

        store.replace(Counter { value: 7 }).await.unwrap();
        store
            .update(|c| Counter { value: c.value * 2 })
            .await
            .unwrap();

        assert_eq!(
            *port.saved.lock().unwrap(),
            vec![Counter { value: 7 }, Counter { value: 14 }]
        );
        assert_eq!(port.load().await.unwrap(), Some(Counter { value: 14 }));
    }

    #[tokio::test]
    async fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let port = JsonFilePersistence::new(dir.path().join("nested/state.json"));

        let missing: Option<Counter> = port.load().await.unwrap();
        assert_eq!(missing, None);

        port.save(&Counter { value: 3 }).await.unwrap();
        let loaded: Option<Counter> = port.load().await.unwrap();
        assert_eq!(loaded, Some(Counter { value: 3 }));
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<Option<Counter>, _> = JsonFilePersistence::new(path).load().await;
        assert!(matches!(result, Err(PersistenceError::Json(_))));
    }
}
