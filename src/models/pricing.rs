use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One model-pricing row (relational, mutable with temporal validity).
/// `project_id = None` means a global row; a project-specific row always
/// wins over a global one for the same model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelPricing {
    pub id: String,
    /// Display name of the model family this row covers.
    pub model_name: String,
    /// Regex the span's model name must match.
    pub match_pattern: String,
    pub provider: String,
    pub project_id: Option<String>,
    pub input_cost_per_million: Decimal,
    pub output_cost_per_million: Decimal,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_deprecated: bool,
}

/// The per-unit prices in effect when a span was ingested, stamped onto the
/// span for audit, plus the computed cost breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
    pub input_cost_per_million: Decimal,
    pub output_cost_per_million: Decimal,
}
