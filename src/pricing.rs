use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::meta_db::MetaDb;
use crate::models::pricing::{CostBreakdown, ModelPricing};

fn tokens_per_unit() -> Decimal {
    Decimal::from(1_000_000u64)
}

/// Stateless model-pricing resolver (§4.3). Pricing rows are consulted per
/// request; temporal validity makes cache invalidation unnecessary.
pub struct PricingResolver {
    meta: Arc<MetaDb>,
}

impl PricingResolver {
    pub fn new(meta: Arc<MetaDb>) -> Self {
        Self { meta }
    }

    /// Resolve the pricing row in effect right now.
    pub fn find_by_model_name(
        &self,
        model_name: &str,
        project_id: &str,
    ) -> CoreResult<ModelPricing> {
        self.find_historical_pricing(model_name, project_id, chrono::Utc::now())
    }

    /// Resolve the pricing row in effect at `at`. Candidates arrive ordered
    /// project-specific-first then newest-start-date-first, so the first
    /// regex match is the deterministic answer.
    pub fn find_historical_pricing(
        &self,
        model_name: &str,
        project_id: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<ModelPricing> {
        if model_name.is_empty() {
            return Err(CoreError::NotFound("model pricing"));
        }
        let at = at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let candidates = self.meta.pricing_candidates(project_id, &at)?;
        for candidate in candidates {
            let pattern = regex::Regex::new(&candidate.match_pattern).map_err(|e| {
                CoreError::Corrupt(format!(
                    "pricing pattern {:?}: {e}",
                    candidate.match_pattern
                ))
            })?;
            if pattern.is_match(model_name) {
                return Ok(candidate);
            }
        }
        Err(CoreError::NotFound("model pricing"))
    }
}

/// Compute the cost breakdown for one span from its token usage and the
/// resolved pricing row. Decimal throughout; the per-million rates are
/// stamped verbatim into the snapshot for audit.
pub fn compute_cost(
    pricing: &ModelPricing,
    input_tokens: u64,
    output_tokens: u64,
) -> CostBreakdown {
    let input_cost =
        pricing.input_cost_per_million * Decimal::from(input_tokens) / tokens_per_unit();
    let output_cost =
        pricing.output_cost_per_million * Decimal::from(output_tokens) / tokens_per_unit();
    CostBreakdown {
        total_cost: input_cost + output_cost,
        input_cost,
        output_cost,
        input_cost_per_million: pricing.input_cost_per_million,
        output_cost_per_million: pricing.output_cost_per_million,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn resolver_with(rows: &[ModelPricing]) -> PricingResolver {
        let meta = Arc::new(MetaDb::open_in_memory().unwrap());
        for row in rows {
            meta.insert_model_pricing(row).unwrap();
        }
        PricingResolver::new(meta)
    }

    fn row(id: &str, pattern: &str, project: Option<&str>, start: Option<&str>) -> ModelPricing {
        ModelPricing {
            id: id.to_string(),
            model_name: "gpt-4o".to_string(),
            match_pattern: pattern.to_string(),
            provider: "openai".to_string(),
            project_id: project.map(|p| p.to_string()),
            input_cost_per_million: dec!(1.50),
            output_cost_per_million: dec!(2.00),
            start_date: start.map(|s| s.to_string()),
            end_date: None,
            is_deprecated: false,
        }
    }

    fn at(ts: &str) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339(ts)
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    #[test]
    fn test_regex_match() {
        let resolver = resolver_with(&[row("r1", "^gpt-4o(-mini)?$", None, None)]);
        assert!(resolver.find_by_model_name("gpt-4o-mini", "p1").is_ok());
        assert!(resolver.find_by_model_name("gpt-4o", "p1").is_ok());
        assert!(matches!(
            resolver.find_by_model_name("gpt-4o-turbo", "p1"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_project_specific_wins_over_global() {
        let resolver = resolver_with(&[
            row("global", "^gpt-4o$", None, None),
            row("proj", "^gpt-4o$", Some("p1"), None),
        ]);
        let hit = resolver.find_by_model_name("gpt-4o", "p1").unwrap();
        assert_eq!(hit.id, "proj");
        // other projects fall back to the global row
        let hit = resolver.find_by_model_name("gpt-4o", "p2").unwrap();
        assert_eq!(hit.id, "global");
    }

    #[test]
    fn test_more_recent_start_date_wins() {
        let resolver = resolver_with(&[
            row("older", "^gpt-4o$", None, Some("2025-01-01")),
            row("newer", "^gpt-4o$", None, Some("2026-01-01")),
        ]);
        let hit = resolver
            .find_historical_pricing("gpt-4o", "p1", at("2026-06-01T00:00:00Z"))
            .unwrap();
        assert_eq!(hit.id, "newer");
        // before the newer row took effect, the older one applies
        let hit = resolver
            .find_historical_pricing("gpt-4o", "p1", at("2025-06-01T00:00:00Z"))
            .unwrap();
        assert_eq!(hit.id, "older");
    }

    #[test]
    fn test_determinism_across_calls() {
        let resolver = resolver_with(&[
            row("a", "^gpt-4o$", None, Some("2025-01-01")),
            row("b", "^gpt-4o$", None, Some("2025-01-01")),
        ]);
        let t = at("2026-01-01T00:00:00Z");
        let first = resolver.find_historical_pricing("gpt-4o", "p1", t).unwrap();
        for _ in 0..5 {
            let again = resolver.find_historical_pricing("gpt-4o", "p1", t).unwrap();
            assert_eq!(again.id, first.id);
        }
    }

    #[test]
    fn test_empty_model_name_is_not_found() {
        let resolver = resolver_with(&[row("r1", ".*", None, None)]);
        assert!(matches!(
            resolver.find_by_model_name("", "p1"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_compute_cost_scenario() {
        // 1000 input tokens at 1.50/M + 500 output tokens at 2.00/M
        let breakdown = compute_cost(&row("r1", "^gpt-4o(-mini)?$", None, None), 1000, 500);
        assert_eq!(breakdown.input_cost, dec!(0.0015));
        assert_eq!(breakdown.output_cost, dec!(0.0010));
        assert_eq!(breakdown.total_cost, dec!(0.0025));
        assert_eq!(breakdown.input_cost_per_million, dec!(1.50));
        assert_eq!(breakdown.output_cost_per_million, dec!(2.00));
    }

    #[test]
    fn test_compute_cost_zero_usage() {
        let breakdown = compute_cost(&row("r1", ".*", None, None), 0, 0);
        assert_eq!(breakdown.total_cost, Decimal::ZERO);
    }
}
