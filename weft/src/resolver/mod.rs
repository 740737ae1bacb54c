//! Model resolver: select a provider and backend for a request under soft
//! constraints.
//!
//! Given a request (provider-type set, model-name set, minimum context
//! length, required capability) the resolver filters the provider list,
//! dedups by provider identity preserving first-seen order, and hands the
//! surviving candidates to a [`SelectionPolicy`]. Capability clients are then
//! created against the chosen backend.

mod normalize;
mod policy;

pub use normalize::{names_match, normalize_model_name};
pub use policy::SelectionPolicy;

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::WeftError;
use crate::provider::{
    Capability, ChatClient, EmbedClient, PromptClient, Provider, StreamClient,
};

/// Soft constraints for one resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolveRequest {
    /// Provider-type tags to consider; empty means all types.
    pub provider_types: Vec<String>,
    /// Model names in priority order; empty means any model.
    pub model_names: Vec<String>,
    /// Minimum context length in tokens. Negative is invalid.
    pub context_length: i64,
    /// Capability the caller needs.
    pub capability: Capability,
}

impl ResolveRequest {
    pub fn chat(model_names: Vec<String>) -> Self {
        Self {
            model_names,
            capability: Capability::Chat,
            ..Self::default()
        }
    }

    pub fn prompt(model_names: Vec<String>) -> Self {
        Self {
            model_names,
            capability: Capability::Prompt,
            ..Self::default()
        }
    }
}

/// Winning provider and the backend the policy picked for it.
pub struct Resolution {
    pub provider: Arc<dyn Provider>,
    pub backend_id: String,
}

/// Runs the resolution algorithm against `providers`.
///
/// Steps: filter by provider type; match model names (exact or normalized) in
/// priority order; drop candidates below the context minimum or without the
/// capability; dedup by provider id first-seen; hand to `policy`.
///
/// Errors: `BadInput` (negative context length), `NoAvailableModels` (no
/// provider of the requested types), `NoSatisfactoryModel` (every candidate
/// filtered out).
pub fn resolve(
    providers: &[Arc<dyn Provider>],
    request: &ResolveRequest,
    policy: SelectionPolicy,
) -> Result<Resolution, WeftError> {
    if request.context_length < 0 {
        return Err(WeftError::BadInput(format!(
            "negative context length {}",
            request.context_length
        )));
    }

    let of_type: Vec<Arc<dyn Provider>> = providers
        .iter()
        .filter(|p| {
            request.provider_types.is_empty()
                || request
                    .provider_types
                    .iter()
                    .any(|t| t == p.provider_type())
        })
        .cloned()
        .collect();
    if of_type.is_empty() {
        return Err(WeftError::NoAvailableModels);
    }

    let satisfies = |p: &Arc<dyn Provider>| {
        p.context_length() >= request.context_length && p.has_capability(request.capability)
    };

    let mut candidates: Vec<Arc<dyn Provider>> = Vec::new();
    if request.model_names.is_empty() {
        candidates.extend(of_type.iter().filter(|p| satisfies(p)).cloned());
    } else {
        // Names are priority-ordered: all matches for the first name come
        // before any match for the second.
        for name in &request.model_names {
            for p in &of_type {
                if names_match(name, p.model_name()) && satisfies(p) {
                    candidates.push(p.clone());
                }
            }
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|p| seen.insert(p.id()));

    if candidates.is_empty() {
        return Err(WeftError::NoSatisfactoryModel);
    }

    let (provider, backend_id) = policy
        .select(&candidates)
        .ok_or(WeftError::NoSatisfactoryModel)?;
    Ok(Resolution {
        provider,
        backend_id,
    })
}

/// Resolves and opens a chat client.
pub fn resolve_chat(
    providers: &[Arc<dyn Provider>],
    request: &ResolveRequest,
    policy: SelectionPolicy,
) -> Result<(Box<dyn ChatClient>, Arc<dyn Provider>, String), WeftError> {
    let mut request = request.clone();
    request.capability = Capability::Chat;
    let r = resolve(providers, &request, policy)?;
    let client = r.provider.chat_client(&r.backend_id)?;
    Ok((client, r.provider, r.backend_id))
}

/// Resolves and opens a prompt client. Prompt execution requires an explicit
/// model-name set.
pub fn resolve_prompt(
    providers: &[Arc<dyn Provider>],
    request: &ResolveRequest,
    policy: SelectionPolicy,
) -> Result<(Box<dyn PromptClient>, Arc<dyn Provider>, String), WeftError> {
    if request.model_names.is_empty() {
        return Err(WeftError::BadInput(
            "prompt execution requires model names".into(),
        ));
    }
    let mut request = request.clone();
    request.capability = Capability::Prompt;
    let r = resolve(providers, &request, policy)?;
    let client = r.provider.prompt_client(&r.backend_id)?;
    Ok((client, r.provider, r.backend_id))
}

/// Resolves and opens an embed client.
pub fn resolve_embed(
    providers: &[Arc<dyn Provider>],
    request: &ResolveRequest,
    policy: SelectionPolicy,
) -> Result<(Box<dyn EmbedClient>, Arc<dyn Provider>, String), WeftError> {
    let mut request = request.clone();
    request.capability = Capability::Embed;
    let r = resolve(providers, &request, policy)?;
    let client = r.provider.embed_client(&r.backend_id)?;
    Ok((client, r.provider, r.backend_id))
}

/// Resolves and opens a stream client.
pub fn resolve_stream(
    providers: &[Arc<dyn Provider>],
    request: &ResolveRequest,
    policy: SelectionPolicy,
) -> Result<(Box<dyn StreamClient>, Arc<dyn Provider>, String), WeftError> {
    let mut request = request.clone();
    request.capability = Capability::Stream;
    let r = resolve(providers, &request, policy)?;
    let client = r.provider.stream_client(&r.backend_id)?;
    Ok((client, r.provider, r.backend_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn providers() -> Vec<Arc<dyn Provider>> {
        vec![
            Arc::new(MockProvider::new("llama2", 4096)),
            Arc::new(
                MockProvider::new("mistral", 8192).with_capabilities(true, true, false, false),
            ),
            Arc::new(MockProvider::new("tiny", 1024)),
        ]
    }

    /// **Scenario**: requested tagged name resolves via normalization.
    #[test]
    fn resolves_normalized_name() {
        let req = ResolveRequest {
            model_names: vec!["llama2:7b".into()],
            context_length: 4096,
            capability: Capability::Chat,
            ..Default::default()
        };
        let r = resolve(&providers(), &req, SelectionPolicy::Random).unwrap();
        assert_eq!(r.provider.model_name(), "llama2");
    }

    /// **Scenario**: context minimum filters candidates out.
    #[test]
    fn context_minimum_filters() {
        let req = ResolveRequest {
            model_names: vec!["tiny".into()],
            context_length: 2048,
            capability: Capability::Chat,
            ..Default::default()
        };
        assert!(matches!(
            resolve(&providers(), &req, SelectionPolicy::Random),
            Err(WeftError::NoSatisfactoryModel)
        ));
    }

    /// **Scenario**: capability predicate filters candidates out.
    #[test]
    fn capability_filters() {
        let req = ResolveRequest {
            model_names: vec!["mistral".into()],
            capability: Capability::Embed,
            ..Default::default()
        };
        assert!(matches!(
            resolve(&providers(), &req, SelectionPolicy::Random),
            Err(WeftError::NoSatisfactoryModel)
        ));
    }

    /// **Scenario**: empty model names consider every eligible provider;
    /// HighestContext picks the largest.
    #[test]
    fn empty_names_with_highest_context() {
        let req = ResolveRequest {
            capability: Capability::Chat,
            ..Default::default()
        };
        let r = resolve(&providers(), &req, SelectionPolicy::HighestContext).unwrap();
        assert_eq!(r.provider.model_name(), "mistral");
    }

    /// **Scenario**: unknown provider type yields NoAvailableModels.
    #[test]
    fn unknown_provider_type() {
        let req = ResolveRequest {
            provider_types: vec!["gemini".into()],
            ..Default::default()
        };
        assert!(matches!(
            resolve(&providers(), &req, SelectionPolicy::Random),
            Err(WeftError::NoAvailableModels)
        ));
    }

    /// **Scenario**: negative context length is rejected up front.
    #[test]
    fn negative_context_is_bad_input() {
        let req = ResolveRequest {
            context_length: -1,
            ..Default::default()
        };
        assert!(matches!(
            resolve(&providers(), &req, SelectionPolicy::Random),
            Err(WeftError::BadInput(_))
        ));
    }

    /// **Scenario**: prompt resolution without model names is invalid.
    #[test]
    fn prompt_requires_model_names() {
        let req = ResolveRequest::default();
        assert!(matches!(
            resolve_prompt(&providers(), &req, SelectionPolicy::Random),
            Err(WeftError::BadInput(_))
        ));
    }

    /// **Scenario**: duplicate providers collapse, first-seen order kept.
    #[test]
    fn dedup_by_provider_id() {
        let dup: Vec<Arc<dyn Provider>> = vec![
            Arc::new(MockProvider::new("llama2", 4096)),
            Arc::new(MockProvider::new("llama2", 4096)),
        ];
        let req = ResolveRequest {
            model_names: vec!["llama2".into(), "llama2:7b".into()],
            ..Default::default()
        };
        // With duplicates removed only one candidate remains; selection must
        // still succeed.
        let r = resolve(&dup, &req, SelectionPolicy::Random).unwrap();
        assert_eq!(r.provider.model_name(), "llama2");
    }
}
