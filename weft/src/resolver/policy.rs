//! Selection policies: pick one (provider, backend) from the candidate list.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::provider::Provider;

/// How the resolver chooses among equally-eligible candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Uniform over candidates, then uniform over that provider's backends.
    #[default]
    Random,
    /// Argmax over context length (ties broken uniformly), then uniform
    /// backend selection.
    HighestContext,
}

impl SelectionPolicy {
    /// Picks a provider and one of its backends. Returns `None` for an empty
    /// candidate list or a winner with no backends.
    pub fn select(
        &self,
        candidates: &[Arc<dyn Provider>],
    ) -> Option<(Arc<dyn Provider>, String)> {
        let mut rng = rand::thread_rng();
        let provider = match self {
            SelectionPolicy::Random => candidates.choose(&mut rng)?.clone(),
            SelectionPolicy::HighestContext => {
                let max = candidates.iter().map(|p| p.context_length()).max()?;
                let top: Vec<_> = candidates
                    .iter()
                    .filter(|p| p.context_length() == max)
                    .collect();
                (*top.get(rng.gen_range(0..top.len()))?).clone()
            }
        };
        let backends = provider.backend_ids();
        let backend = backends.choose(&mut rng)?.clone();
        Some((provider, backend))
    }
}
