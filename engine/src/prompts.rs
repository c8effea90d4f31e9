//! Prompt text shipped with the binary.

use std::sync::OnceLock;

const SYSTEM_PROMPT_RAW: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/system_prompt.md"));

const ANALYSIS_DIRECTIVE_RAW: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/analysis_directive.md"));

static ANALYSIS_PROMPT: OnceLock<String> = OnceLock::new();

/// Advisor persona used for every free-form chat request.
#[must_use]
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT_RAW.trim_end()
}

/// Persona plus the output-structure directive, for structured analysis.
#[must_use]
pub fn analysis_prompt() -> &'static str {
    ANALYSIS_PROMPT
        .get_or_init(|| {
            format!(
                "{}\n\n{}",
                SYSTEM_PROMPT_RAW.trim_end(),
                ANALYSIS_DIRECTIVE_RAW.trim_end()
            )
        })
        .as_str()
}
