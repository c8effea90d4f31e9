//! User-facing text shown when a completion fails.
//!
//! The gateway only ever returns classified errors; this module is the single
//! place that turns them into words.

use fintech_types::{FailureKind, StructuredAnalysis};

pub const RATE_LIMITED_REPLY: &str = "I'm currently experiencing high demand. Please try again in a moment. Meanwhile, I'm here to help with your financial queries whenever you're ready.";

pub const UNAUTHORIZED_REPLY: &str = "I'm having trouble connecting to my knowledge base. Please ensure the API configuration is correct.";

pub const GENERIC_REPLY: &str = "I apologize, but I'm experiencing technical difficulties. Please try rephrasing your question or try again later. I'm here to help with your financial needs.";

/// Emitted once, as a final fragment, when a stream fails.
pub const STREAM_APOLOGY: &str =
    "I apologize, but I'm experiencing technical difficulties. Please try again later.";

const ANALYSIS_SUMMARY: &str = "Unable to provide structured analysis at the moment.";
const ANALYSIS_BODY: &str =
    "I'm experiencing technical difficulties. Please try again with your financial query.";
const ANALYSIS_DISCLAIMER: &str = "This is a technical error response. Please consult with certified financial advisors for investment decisions.";

#[must_use]
pub fn reply_text(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::RateLimited => RATE_LIMITED_REPLY,
        FailureKind::Unauthorized => UNAUTHORIZED_REPLY,
        FailureKind::Other => GENERIC_REPLY,
    }
}

#[must_use]
pub fn analysis() -> StructuredAnalysis {
    StructuredAnalysis::new(ANALYSIS_SUMMARY, ANALYSIS_BODY, ANALYSIS_DISCLAIMER)
}
