//! Backend registration, selection, and lifecycle on the engine.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{BackendFactory, BackendFuture, KernelBackend};
use crate::engine::Engine;
use crate::error::BackendInitError;
use crate::env;

pub(crate) struct FactoryEntry {
    factory: BackendFactory,
    priority: i32,
}

#[derive(Default)]
pub(crate) struct BackendsState {
    factories: HashMap<String, FactoryEntry>,
    instances: HashMap<String, Arc<dyn KernelBackend>>,
    active: Option<String>,
}

impl Engine {
    fn backends_state(&self) -> std::sync::MutexGuard<'_, BackendsState> {
        self.backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a backend with a synchronous factory. Returns `false` (with
    /// a warning) when the name is already taken; the existing factory wins.
    pub fn register_backend<F>(&self, name: impl Into<String>, factory: F, priority: i32) -> bool
    where
        F: Fn() -> Result<Box<dyn KernelBackend>, BackendInitError> + Send + Sync + 'static,
    {
        self.register_backend_entry(
            name.into(),
            BackendFactory::Sync(Arc::new(factory)),
            priority,
        )
    }

    /// Registers a backend whose factory must be awaited (hardware probing,
    /// module loading).
    pub fn register_backend_async<F>(
        &self,
        name: impl Into<String>,
        factory: F,
        priority: i32,
    ) -> bool
    where
        F: Fn() -> BackendFuture + Send + Sync + 'static,
    {
        self.register_backend_entry(
            name.into(),
            BackendFactory::Async(Arc::new(factory)),
            priority,
        )
    }

    fn register_backend_entry(&self, name: String, factory: BackendFactory, priority: i32) -> bool {
        let mut backends = self.backends_state();
        if backends.factories.contains_key(&name) {
            log::warn!("backend '{name}' was already registered; keeping the existing factory");
            return false;
        }
        backends
            .factories
            .insert(name, FactoryEntry { factory, priority });
        true
    }

    /// Registered backend names, highest priority first.
    pub fn backend_names(&self) -> Vec<String> {
        let backends = self.backends_state();
        let mut names: Vec<(String, i32)> = backends
            .factories
            .iter()
            .map(|(name, entry)| (name.clone(), entry.priority))
            .collect();
        names.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        names.into_iter().map(|(name, _)| name).collect()
    }

    /// Name of the active backend, if one has been initialized.
    pub fn backend_name(&self) -> Option<String> {
        self.backends_state().active.clone()
    }

    /// Makes `name` the active backend, resolving its factory first when no
    /// live instance exists. On failure the previously active backend stays
    /// untouched and the error is surfaced.
    pub async fn set_backend(&self, name: &str) -> Result<(), BackendInitError> {
        let (factory, existing) = {
            let backends = self.backends_state();
            let entry = backends
                .factories
                .get(name)
                .ok_or_else(|| BackendInitError::UnknownBackend {
                    name: name.to_string(),
                })?;
            (entry.factory.clone(), backends.instances.get(name).cloned())
        };

        let instance = match existing {
            Some(instance) => instance,
            None => {
                let built = match &factory {
                    BackendFactory::Sync(build) => build(),
                    BackendFactory::Async(build) => build().await,
                };
                match built {
                    Ok(boxed) => Arc::from(boxed),
                    Err(err) => {
                        log::warn!("initialization of backend '{name}' failed: {err}");
                        return Err(err);
                    }
                }
            }
        };

        self.activate(name, instance);
        Ok(())
    }

    /// Initializes the best available backend: the `GRADRS_BACKEND` override
    /// first when set, then every registered factory in priority order.
    pub async fn ready(&self) -> Result<(), BackendInitError> {
        if self.backends_state().active.is_some() {
            return Ok(());
        }
        let mut order = self.backend_names();
        if order.is_empty() {
            return Err(BackendInitError::NoneRegistered);
        }
        if let Some(forced) = env::backend_override() {
            if let Some(pos) = order.iter().position(|name| name == forced) {
                let name = order.remove(pos);
                order.insert(0, name);
            } else {
                log::warn!("GRADRS_BACKEND names unknown backend '{forced}'; ignoring");
            }
        }
        for name in order {
            match self.set_backend(&name).await {
                Ok(()) => return Ok(()),
                Err(err) => log::warn!("skipping backend '{name}': {err}"),
            }
        }
        Err(BackendInitError::NoBackend)
    }

    /// Removes a backend: its factory, its instance (disposed), and — when it
    /// was active — the active slot. Absent names are a silent no-op.
    pub fn remove_backend(&self, name: &str) {
        let instance = {
            let mut backends = self.backends_state();
            backends.factories.remove(name);
            if backends.active.as_deref() == Some(name) {
                backends.active = None;
            }
            backends.instances.remove(name)
        };
        if let Some(instance) = instance {
            for hook in self.kernels.take_active_disposes(name) {
                hook(instance.as_ref());
            }
            instance.dispose();
        }
    }

    fn activate(&self, name: &str, instance: Arc<dyn KernelBackend>) {
        {
            let mut backends = self.backends_state();
            backends
                .instances
                .insert(name.to_string(), Arc::clone(&instance));
            backends.active = Some(name.to_string());
        }
        for hook in self.kernels.take_pending_setups(name) {
            hook(instance.as_ref());
        }
    }

    /// The active backend, lazily initializing the best synchronous factory
    /// when none is active yet. Asynchronous-only candidates fail fast with
    /// an instruction to await [`Engine::ready`].
    pub(crate) fn active_backend(
        &self,
    ) -> Result<(String, Arc<dyn KernelBackend>), BackendInitError> {
        if let Some(active) = {
            let backends = self.backends_state();
            backends
                .active
                .as_ref()
                .and_then(|name| backends.instances.get(name).map(|i| (name.clone(), i.clone())))
        } {
            return Ok(active);
        }

        let order = self.backend_names();
        if order.is_empty() {
            return Err(BackendInitError::NoneRegistered);
        }
        for name in order {
            let factory = {
                let backends = self.backends_state();
                backends.factories.get(&name).map(|entry| entry.factory.clone())
            };
            let Some(factory) = factory else { continue };
            match factory {
                BackendFactory::Async(_) => {
                    return Err(BackendInitError::AsyncInitRequired { name });
                }
                BackendFactory::Sync(build) => match build() {
                    Ok(boxed) => {
                        let instance: Arc<dyn KernelBackend> = Arc::from(boxed);
                        self.activate(&name, Arc::clone(&instance));
                        return Ok((name, instance));
                    }
                    Err(err) => {
                        log::warn!("initialization of backend '{name}' failed: {err}");
                    }
                },
            }
        }
        Err(BackendInitError::NoBackend)
    }

    /// A live (already initialized) backend instance by name, without
    /// triggering initialization.
    pub(crate) fn initialized_backend(&self, name: &str) -> Option<Arc<dyn KernelBackend>> {
        self.backends_state().instances.get(name).cloned()
    }

    pub(crate) fn active_backend_if_initialized(&self) -> Option<Arc<dyn KernelBackend>> {
        let backends = self.backends_state();
        backends
            .active
            .as_ref()
            .and_then(|name| backends.instances.get(name).cloned())
    }

    pub(crate) fn drain_backend_instances(&self) -> Vec<(String, Arc<dyn KernelBackend>)> {
        let mut backends = self.backends_state();
        backends.active = None;
        backends.instances.drain().collect()
    }
}
