//! In-memory snapshot of per-backend runtime state.
//!
//! Written only by the sync cycle (single-writer discipline); read
//! concurrently by the resolver. Reads return a defensively cloned snapshot
//! so no caller can observe a half-applied cycle.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::provider::{BackendRef, CapabilityFlags, HttpProvider, Provider};
use crate::store::{Backend, ModelDeclaration};

use std::sync::Arc;

/// One installed model as the runtime sees it: what the backend reported,
/// joined with the operator's declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct InstalledModel {
    pub name: String,
    pub digest: String,
    pub size: i64,
    pub context_length: i64,
    pub can_chat: bool,
    pub can_prompt: bool,
    pub can_embed: bool,
    pub can_stream: bool,
}

impl InstalledModel {
    /// Joins what a backend reported with the matching declaration.
    pub fn from_declaration(
        name: String,
        digest: String,
        size: i64,
        decl: &ModelDeclaration,
    ) -> Self {
        Self {
            name,
            digest,
            size,
            context_length: decl.context_length,
            can_chat: decl.can_chat,
            can_prompt: decl.can_prompt,
            can_embed: decl.can_embed,
            can_stream: decl.can_stream,
        }
    }
}

/// Runtime state of one backend: last observed error (empty when healthy)
/// and the installed model list.
#[derive(Clone, Debug, Default)]
pub struct BackendState {
    pub backend: Option<Backend>,
    pub error: String,
    pub installed: Vec<InstalledModel>,
}

/// Map backend-id → [`BackendState`] under a reader-writer lock.
#[derive(Default)]
pub struct RuntimeState {
    inner: RwLock<HashMap<String, BackendState>>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defensive snapshot of the whole map.
    pub fn snapshot(&self) -> HashMap<String, BackendState> {
        self.inner.read().expect("runtime state lock").clone()
    }

    /// Replaces one backend's state after a successful probe, clearing the
    /// error. Sync-cycle only.
    pub fn set_healthy(&self, backend: Backend, installed: Vec<InstalledModel>) {
        let mut map = self.inner.write().expect("runtime state lock");
        map.insert(
            backend.id.clone(),
            BackendState {
                backend: Some(backend),
                error: String::new(),
                installed,
            },
        );
    }

    /// Records a probe failure, leaving the installed list unchanged.
    /// Sync-cycle only.
    pub fn set_error(&self, backend: Backend, error: String) {
        let mut map = self.inner.write().expect("runtime state lock");
        let entry = map.entry(backend.id.clone()).or_default();
        entry.backend = Some(backend);
        entry.error = error;
    }

    /// Drops backends no longer in the declared list.
    pub fn retain_backends(&self, keep: &[String]) {
        let mut map = self.inner.write().expect("runtime state lock");
        map.retain(|id, _| keep.iter().any(|k| k == id));
    }

    /// Builds the provider list the resolver consumes: one provider per
    /// installed model name, carrying every healthy backend it is installed
    /// on.
    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        let snapshot = self.snapshot();

        // model name -> (provider_type, flags, ctx, backends)
        let mut by_model: HashMap<String, (String, CapabilityFlags, i64, Vec<BackendRef>)> =
            HashMap::new();
        let mut order: Vec<String> = Vec::new();

        let mut ids: Vec<&String> = snapshot.keys().collect();
        ids.sort();
        for id in ids {
            let state = &snapshot[id];
            if !state.error.is_empty() {
                continue;
            }
            let Some(backend) = &state.backend else {
                continue;
            };
            for model in &state.installed {
                let entry = by_model.entry(model.name.clone()).or_insert_with(|| {
                    order.push(model.name.clone());
                    (
                        backend.provider_type.clone(),
                        CapabilityFlags {
                            chat: model.can_chat,
                            prompt: model.can_prompt,
                            embed: model.can_embed,
                            stream: model.can_stream,
                        },
                        model.context_length,
                        Vec::new(),
                    )
                });
                entry.3.push(BackendRef {
                    id: backend.id.clone(),
                    base_url: backend.base_url.clone(),
                    api_key: None,
                });
            }
        }

        order
            .into_iter()
            .map(|name| {
                let (provider_type, flags, ctx, backends) = by_model.remove(&name).expect("model");
                Arc::new(HttpProvider::new(name, provider_type, ctx, flags, backends))
                    as Arc<dyn Provider>
            })
            .collect()
    }
}
