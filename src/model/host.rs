//! Lazy, once-only ownership of the base model.

use std::time::Instant;

use once_cell::sync::OnceCell;

use super::{ModelHandle, ModelLoader};
use crate::error::ChatError;

/// Owns the process-wide [`ModelHandle`].
///
/// The first [`ensure_loaded`](Self::ensure_loaded) call performs the load;
/// concurrent callers block until it finishes and observe the same handle.
/// A failed load stores nothing, so a later call tries again. Once loaded,
/// the model stays resident for the rest of the process.
pub struct ModelHost {
    loader: Box<dyn ModelLoader>,
    handle: OnceCell<ModelHandle>,
}

impl ModelHost {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            handle: OnceCell::new(),
        }
    }

    /// Load the base model and tokenizer if needed and return the handle.
    pub fn ensure_loaded(&self) -> Result<ModelHandle, ChatError> {
        self.handle
            .get_or_try_init(|| {
                let name = self.loader.describe();
                log::info!("Loading base model {}", name);
                let started = Instant::now();
                let handle = self.loader.load().map_err(|source| {
                    log::error!("Failed to load base model {}: {}", name, source);
                    ChatError::Load {
                        target: format!("base model {name}"),
                        source,
                    }
                })?;
                log::info!(
                    "Base model {} ready in {:.1}s",
                    name,
                    started.elapsed().as_secs_f64()
                );
                Ok(handle)
            })
            .cloned()
    }

    /// Whether the base model is resident.
    pub fn is_loaded(&self) -> bool {
        self.handle.get().is_some()
    }
}

impl std::fmt::Debug for ModelHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHost")
            .field("loader", &self.loader.describe())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockLoader;
    use std::sync::Arc;

    #[test]
    fn test_loads_once() {
        let loader = MockLoader::new();
        let loads = loader.load_count();
        let host = ModelHost::new(loader);

        assert!(!host.is_loaded());
        let first = host.ensure_loaded().unwrap();
        let second = host.ensure_loaded().unwrap();
        assert!(host.is_loaded());
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.tokenizer, &second.tokenizer));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let loader = MockLoader::new().failing_first(1);
        let loads = loader.load_count();
        let host = ModelHost::new(loader);

        let err = host.ensure_loaded().unwrap_err();
        assert_eq!(err.kind(), "load_error");
        assert!(err.to_string().contains("base model"));
        assert!(!host.is_loaded());

        host.ensure_loaded().unwrap();
        assert!(host.is_loaded());
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_load() {
        let loader = MockLoader::new();
        let loads = loader.load_count();
        let host = Arc::new(ModelHost::new(loader));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let host = Arc::clone(&host);
                std::thread::spawn(move || host.ensure_loaded().is_ok())
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
