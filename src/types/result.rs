use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PRICE_WEIGHT: f64 = 0.3;
pub const LOCATION_WEIGHT: f64 = 0.3;
pub const DEAL_WEIGHT: f64 = 0.4;

/// Output of one agent's `process` call.
///
/// `score` is the stage's contribution to the combined score, already
/// normalized to `[0, 10]` by the producing agent. `output` is the agent's
/// structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub agent: String,
    pub score: f64,
    pub output: Value,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(agent: impl Into<String>, score: f64, output: Value) -> Self {
        Self {
            agent: agent.into(),
            score,
            output,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    /// Numeric field from the payload, if present.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.output.get(field).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Strong,
    Good,
    Moderate,
    Limited,
}

impl Recommendation {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Recommendation::Strong
        } else if score >= 6.0 {
            Recommendation::Good
        } else if score >= 4.0 {
            Recommendation::Moderate
        } else {
            Recommendation::Limited
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Recommendation::Strong => "strong",
            Recommendation::Good => "good",
            Recommendation::Moderate => "moderate",
            Recommendation::Limited => "limited",
        }
    }

    pub fn headline(&self) -> &str {
        match self {
            Recommendation::Strong => "Strong investment opportunity",
            Recommendation::Good => "Good investment potential",
            Recommendation::Moderate => "Moderate investment potential",
            Recommendation::Limited => "Limited investment potential",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedResult {
    pub combined_score: f64,
    pub recommendation: Recommendation,
    pub recommendations: Vec<String>,
    pub price_estimation: StageResult,
    pub location_analysis: StageResult,
    pub deal_evaluation: StageResult,
    pub generated_at: DateTime<Utc>,
}

impl CombinedResult {
    /// Weighted aggregate of the three stage scores, clamped to `[0, 10]`.
    pub fn combine(price: StageResult, location: StageResult, deal: StageResult) -> Self {
        let component = |score: f64| if score.is_finite() { score.clamp(0.0, 10.0) } else { 0.0 };

        let combined_score = (component(price.score) * PRICE_WEIGHT
            + component(location.score) * LOCATION_WEIGHT
            + component(deal.score) * DEAL_WEIGHT)
            .clamp(0.0, 10.0);
        let recommendation = Recommendation::from_score(combined_score);

        let mut recommendations = vec![recommendation.headline().to_string()];
        if let Some(strategy) = deal.output.get("investment_strategy").and_then(Value::as_str) {
            recommendations.push(format!("Suggested strategy: {}", strategy));
        }

        Self {
            combined_score,
            recommendation,
            recommendations,
            price_estimation: price,
            location_analysis: location,
            deal_evaluation: deal,
            generated_at: Utc::now(),
        }
    }
}
