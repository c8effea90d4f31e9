//! Structured financial analysis payload and its JSON schema.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::request::ResponseSchema;

pub const ANALYSIS_SCHEMA_NAME: &str = "financial_analysis";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recommendation {
    action: String,
    reason: String,
    risk_level: String,
}

impl Recommendation {
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        reason: impl Into<String>,
        risk_level: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            reason: reason.into(),
            risk_level: risk_level.into(),
        }
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn risk_level(&self) -> &str {
        &self.risk_level
    }
}

/// Parsed once on arrival; never streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredAnalysis {
    summary: String,
    analysis: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    market_outlook: Option<String>,
    disclaimer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisValidationError {
    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("recommendation {index} has an empty `{field}`")]
    EmptyRecommendationField { index: usize, field: &'static str },
}

impl StructuredAnalysis {
    #[must_use]
    pub fn new(
        summary: impl Into<String>,
        analysis: impl Into<String>,
        disclaimer: impl Into<String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            analysis: analysis.into(),
            recommendations: Vec::new(),
            market_outlook: None,
            disclaimer: disclaimer.into(),
        }
    }

    #[must_use]
    pub fn with_recommendations(mut self, recommendations: Vec<Recommendation>) -> Self {
        self.recommendations = recommendations;
        self
    }

    #[must_use]
    pub fn with_market_outlook(mut self, outlook: impl Into<String>) -> Self {
        self.market_outlook = Some(outlook.into());
        self
    }

    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    #[must_use]
    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    #[must_use]
    pub fn recommendations(&self) -> &[Recommendation] {
        &self.recommendations
    }

    #[must_use]
    pub fn market_outlook(&self) -> Option<&str> {
        self.market_outlook.as_deref()
    }

    #[must_use]
    pub fn disclaimer(&self) -> &str {
        &self.disclaimer
    }

    /// Checks the guarantees the schema alone cannot express: required text is non-blank.
    pub fn validate(&self) -> Result<(), AnalysisValidationError> {
        for (name, value) in [
            ("summary", &self.summary),
            ("analysis", &self.analysis),
            ("disclaimer", &self.disclaimer),
        ] {
            if value.trim().is_empty() {
                return Err(AnalysisValidationError::EmptyField(name));
            }
        }

        for (index, rec) in self.recommendations.iter().enumerate() {
            for (field, value) in [
                ("action", &rec.action),
                ("reason", &rec.reason),
                ("risk_level", &rec.risk_level),
            ] {
                if value.trim().is_empty() {
                    return Err(AnalysisValidationError::EmptyRecommendationField { index, field });
                }
            }
        }

        Ok(())
    }
}

/// Schema declared to the service and re-checked locally on arrival.
#[must_use]
pub fn financial_analysis_schema() -> ResponseSchema {
    ResponseSchema {
        name: ANALYSIS_SCHEMA_NAME.to_string(),
        schema: schema_body(),
    }
}

fn schema_body() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "analysis": { "type": "string" },
            "recommendations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "action": { "type": "string" },
                        "reason": { "type": "string" },
                        "risk_level": { "type": "string" }
                    },
                    "required": ["action", "reason", "risk_level"],
                    "additionalProperties": false
                }
            },
            "market_outlook": { "type": "string" },
            "disclaimer": { "type": "string" }
        },
        "required": ["summary", "analysis", "disclaimer"],
        "additionalProperties": false
    })
}
