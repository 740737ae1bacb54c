//! Model-name normalization for resolver matching.
//!
//! Two names match when their normalized forms are equal, so `llama2:7b`
//! finds a provider named `llama2` and `meta-llama/Llama-2-7B-GPTQ` finds
//! `llama27b`.

/// Quantization suffixes dropped during normalization.
const QUANT_SUFFIXES: [&str; 4] = ["awq", "gptq", "4bit", "fp16"];

/// Normalizes a model name: lowercase; drop spaces, dashes, underscores and
/// dots; strip the organization prefix at `/`; remove quantization suffixes;
/// strip the tag at the last `:`.
pub fn normalize_model_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut compact: String = lowered
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_' | '.'))
        .collect();

    if let Some(idx) = compact.rfind('/') {
        compact = compact[idx + 1..].to_string();
    }

    loop {
        let before = compact.len();
        for suffix in QUANT_SUFFIXES {
            if let Some(stripped) = compact.strip_suffix(suffix) {
                compact = stripped.to_string();
            }
        }
        if compact.len() == before {
            break;
        }
    }

    if let Some(idx) = compact.rfind(':') {
        compact = compact[..idx].to_string();
    }

    compact
}

/// Whether `requested` matches `provider_name` exactly or after normalization.
pub fn names_match(requested: &str, provider_name: &str) -> bool {
    requested == provider_name
        || normalize_model_name(requested) == normalize_model_name(provider_name)
}
