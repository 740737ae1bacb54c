//! Macro expansion for string fields: `{{family:argument}}`.
//!
//! Supported families: `var` (context variable map; undefined variables
//! resolve to the empty string) and `hookservice` (argument `list` yields
//! the registry's tool description block). Unknown families are left
//! verbatim. Expansion is one pass — expanded output is not re-scanned — and
//! a pure function of the variable map and the precomputed tools block.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::value::DataValue;

static MACRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-zA-Z_]+):([^{}]*)\}\}").expect("macro regex"));

/// Expands every macro in `input`. `tools_block` is the rendering of
/// `{{hookservice:list}}`, computed by the caller once per execution.
pub fn expand_macros(
    input: &str,
    vars: &HashMap<String, DataValue>,
    tools_block: &str,
) -> String {
    MACRO_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let family = &caps[1];
            let argument = &caps[2];
            match family {
                "var" => vars
                    .get(argument)
                    .map(DataValue::render)
                    .unwrap_or_default(),
                "hookservice" if argument == "list" => tools_block.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}
