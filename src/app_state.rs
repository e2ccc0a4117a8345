use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::engine::{EntityTagger, HandleFactory, TextGenerator};
use crate::error::{AppError, Result};
use crate::model_registry::{Capability, ModelMetadata, ModelRegistry, ModelStatus};

/// A slot that is filled at most once and then shared for the rest of the process.
///
/// Readers of a filled slot only take the read lock. Construction happens
/// under `init`, and the slot is checked again once the lock is held, so
/// concurrent first callers wait for a single build instead of racing.
/// A failed build leaves the slot empty; the next caller tries again.
pub struct LazyHandle<H: ?Sized> {
    capability: Capability,
    value: RwLock<Option<Arc<H>>>,
    init: AsyncMutex<()>,
    attempts: AtomicUsize,
}

impl<H: ?Sized + Send + Sync> LazyHandle<H> {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            value: RwLock::new(None),
            init: AsyncMutex::new(()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn get(&self) -> Option<Arc<H>> {
        self.value.read().clone()
    }

    /// Number of times `build` has been run.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn get_or_try_init<F, Fut>(&self, build: F) -> anyhow::Result<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Arc<H>>>,
    {
        if let Some(handle) = self.get() {
            return Ok(handle);
        }

        let _guard = self.init.lock().await;
        if let Some(handle) = self.get() {
            return Ok(handle);
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let handle = build().await?;
        *self.value.write() = Some(handle.clone());
        Ok(handle)
    }
}

/// A resolved handle of either capability.
#[derive(Clone)]
pub enum Handle {
    Generator(Arc<dyn TextGenerator>),
    Tagger(Arc<dyn EntityTagger>),
}

/// Application context: the registry plus one lazily built handle per capability.
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    factory: Arc<dyn HandleFactory>,
    generator: LazyHandle<dyn TextGenerator>,
    tagger: LazyHandle<dyn EntityTagger>,
}

impl AppState {
    pub fn new(registry: ModelRegistry, factory: Arc<dyn HandleFactory>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(registry),
            factory,
            generator: LazyHandle::new(Capability::Generation),
            tagger: LazyHandle::new(Capability::EntityTagging),
        })
    }

    pub fn list_models(&self) -> Vec<ModelMetadata> {
        self.registry.list_models()
    }

    pub async fn generator(&self) -> Result<Arc<dyn TextGenerator>> {
        self.load(&self.generator, || self.factory.build_generator())
            .await
    }

    pub async fn tagger(&self) -> Result<Arc<dyn EntityTagger>> {
        self.load(&self.tagger, || self.factory.build_tagger()).await
    }

    pub async fn resolve(&self, capability: Capability) -> Result<Handle> {
        match capability {
            Capability::Generation => self.generator().await.map(Handle::Generator),
            Capability::EntityTagging => self.tagger().await.map(Handle::Tagger),
        }
    }

    pub fn is_resolved(&self, capability: Capability) -> bool {
        match capability {
            Capability::Generation => self.generator.get().is_some(),
            Capability::EntityTagging => self.tagger.get().is_some(),
        }
    }

    /// How many times construction has been attempted for `capability`.
    pub fn construction_count(&self, capability: Capability) -> usize {
        match capability {
            Capability::Generation => self.generator.attempts(),
            Capability::EntityTagging => self.tagger.attempts(),
        }
    }

    /// Resolves every capability, logging failures instead of returning them.
    pub async fn preload(&self) {
        for capability in Capability::ALL {
            if let Err(err) = self.resolve(capability).await {
                tracing::warn!(%capability, "preload failed: {err}");
            }
        }
    }

    async fn load<H, F, Fut>(&self, slot: &LazyHandle<H>, build: F) -> Result<Arc<H>>
    where
        H: ?Sized + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Arc<H>>>,
    {
        let capability = slot.capability();
        slot.get_or_try_init(|| async move {
            self.registry.set_status(capability, ModelStatus::Loading);
            let model_id = self
                .registry
                .get_model(capability)
                .map(|m| m.model_id)
                .unwrap_or_default();
            tracing::info!(%capability, %model_id, "loading model");

            let started = Instant::now();
            match build().await {
                Ok(handle) => {
                    self.registry.set_status(capability, ModelStatus::Loaded);
                    tracing::info!(
                        %capability,
                        %model_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "model ready"
                    );
                    Ok(handle)
                }
                Err(err) => {
                    self.registry.set_error(capability, format!("{err:#}"));
                    tracing::error!(%capability, %model_id, "model load failed: {err:#}");
                    Err(err)
                }
            }
        })
        .await
        .map_err(|err| AppError::ModelLoad {
            capability,
            message: format!("{err:#}"),
        })
    }
}
