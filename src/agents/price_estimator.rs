use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agents::capability::Capability;
use crate::agents::fields;
use crate::agents::retry::RetryPolicy;
use crate::agents::PRICE_ESTIMATOR;
use crate::error::Result;
use crate::providers::{AreaQuery, Comparable, ComparableCriteria, DataSource, MarketData, TextGenerator};
use crate::types::StageResult;

const MAX_COMPARABLES: usize = 10;
const PROMPT_COMPARABLES: usize = 5;
const FALLBACK_PRICE_PER_SQFT: f64 = 200.0;

/// Estimates market value from comparables, market data and a text model.
pub struct PriceEstimator {
    data: Arc<dyn DataSource>,
    llm: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    max_tokens: u32,
}

impl PriceEstimator {
    pub fn new(
        data: Arc<dyn DataSource>,
        llm: Arc<dyn TextGenerator>,
        retry: RetryPolicy,
        max_tokens: u32,
    ) -> Self {
        Self {
            data,
            llm,
            retry,
            max_tokens,
        }
    }

    fn criteria(data: &Value) -> ComparableCriteria {
        ComparableCriteria {
            address: fields::str_or(data, "address", "").to_string(),
            property_type: fields::str_or(data, "property_type", "").to_string(),
            bedrooms: data["bedrooms"].as_u64().unwrap_or_default() as u32,
            bathrooms: fields::f64_or(data, "bathrooms", 0.0),
            square_feet: data["square_feet"].as_u64().unwrap_or_default() as u32,
            limit: MAX_COMPARABLES,
        }
    }

    fn area(data: &Value) -> AreaQuery {
        let mut area = AreaQuery::new(
            fields::str_or(data, "city", ""),
            fields::str_or(data, "state", ""),
        );
        area.zip_code = data
            .get("zip_code")
            .and_then(Value::as_str)
            .map(str::to_string);
        area
    }

    fn prompt(data: &Value, comparables: &[Comparable], market: &MarketData) -> String {
        let comps = comparables
            .iter()
            .take(PROMPT_COMPARABLES)
            .map(|c| {
                format!(
                    "- ${:.0}, {} sqft, {} bd / {} ba, {} days on market",
                    c.price, c.square_feet, c.bedrooms, c.bathrooms, c.days_on_market
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Provide a price estimate in USD for this property.\n\
             Address: {}\nType: {}\nBedrooms: {}\nBathrooms: {}\nSquare feet: {}\nYear built: {}\n\n\
             Comparable properties:\n{}\n\n\
             Market: average ${:.0}, ${:.0}/sqft, {:.0} days on market, trend {}.\n\
             Answer with a single dollar amount.",
            fields::str_or(data, "address", ""),
            fields::str_or(data, "property_type", ""),
            data["bedrooms"],
            data["bathrooms"],
            data["square_feet"],
            data.get("year_built").filter(|v| !v.is_null()).map_or_else(|| "unknown".to_string(), Value::to_string),
            if comps.is_empty() { "none".to_string() } else { comps },
            market.avg_price,
            market.price_per_sqft,
            market.days_on_market,
            market.price_trend.as_str(),
        )
    }

    async fn estimate(&self, data: &Value, comparables: &[Comparable], market: &MarketData) -> f64 {
        let prompt = Self::prompt(data, comparables, market);
        let answer = self
            .retry
            .run(|| self.llm.generate_text(&prompt, self.max_tokens))
            .await;

        match answer {
            Ok(text) => match parse_price(&text) {
                Some(price) => return price,
                None => warn!(agent = PRICE_ESTIMATOR, "No price found in model answer"),
            },
            Err(err) => warn!(agent = PRICE_ESTIMATOR, error = %err, "Price generation failed, using fallback"),
        }

        fallback_price(data, comparables)
    }
}

/// First `$`-prefixed amount in `text`, else the first plain number of at
/// least 10,000.
pub(crate) fn parse_price(text: &str) -> Option<f64> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    let (dollar, plain) = PATTERNS
        .get_or_init(|| {
            let dollar = Regex::new(r"\$\s*([0-9][0-9,]*(?:\.[0-9]+)?)").ok()?;
            let plain = Regex::new(r"\b([0-9][0-9,]*(?:\.[0-9]+)?)\b").ok()?;
            Some((dollar, plain))
        })
        .as_ref()?;

    let number = |s: &str| s.replace(',', "").parse::<f64>().ok();

    if let Some(price) = dollar
        .captures_iter(text)
        .filter_map(|c| number(&c[1]))
        .find(|p| *p > 0.0)
    {
        return Some(price);
    }

    plain
        .captures_iter(text)
        .filter_map(|c| number(&c[1]))
        .find(|p| *p >= 10_000.0)
}

/// Size-adjusted comparable average, else a flat price per square foot.
pub(crate) fn fallback_price(data: &Value, comparables: &[Comparable]) -> f64 {
    let square_feet = data["square_feet"].as_f64().unwrap_or_default();
    let per_sqft: Vec<f64> = comparables
        .iter()
        .filter(|c| c.price > 0.0 && c.square_feet > 0)
        .map(|c| c.price / c.square_feet as f64)
        .collect();

    if per_sqft.is_empty() || square_feet <= 0.0 {
        return square_feet * FALLBACK_PRICE_PER_SQFT;
    }
    let avg = per_sqft.iter().sum::<f64>() / per_sqft.len() as f64;
    avg * square_feet
}

/// Mean of comparable count, price consistency, data completeness and market
/// availability factors, in `[0, 1]`.
pub(crate) fn confidence(data: &Value, comparables: &[Comparable]) -> f64 {
    let mut factors = vec![(comparables.len() as f64 / 5.0).min(1.0)];

    let prices: Vec<f64> = comparables
        .iter()
        .map(|c| c.price)
        .filter(|p| *p > 0.0)
        .collect();
    if !prices.is_empty() {
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
        let cv = if mean > 0.0 { variance.sqrt() / mean } else { 1.0 };
        factors.push((1.0 - cv).max(0.0));
    }

    let completeness_fields = ["bedrooms", "bathrooms", "square_feet", "year_built"];
    let present = completeness_fields
        .iter()
        .filter(|f| data.get(**f).is_some_and(|v| !v.is_null()))
        .count();
    factors.push(present as f64 / completeness_fields.len() as f64);

    factors.push(if comparables.is_empty() { 0.3 } else { 0.8 });

    (factors.iter().sum::<f64>() / factors.len() as f64).clamp(0.0, 1.0)
}

#[async_trait]
impl Capability for PriceEstimator {
    fn name(&self) -> &str {
        PRICE_ESTIMATOR
    }

    fn check_input(&self, data: &Value) -> std::result::Result<(), String> {
        let agent = PRICE_ESTIMATOR;
        fields::require_str(agent, data, "address")?;
        fields::require_str(agent, data, "property_type")?;
        fields::require_count(agent, data, "bedrooms", 0)?;
        fields::require_positive(agent, data, "bathrooms")?;
        fields::require_count(agent, data, "square_feet", 1)
    }

    async fn analyze(&self, data: &Value) -> Result<StageResult> {
        info!(
            agent = PRICE_ESTIMATOR,
            address = fields::str_or(data, "address", ""),
            "Processing price estimation"
        );

        let criteria = Self::criteria(data);
        let area = Self::area(data);
        let comparables = self.retry.run(|| self.data.get_comparables(&criteria)).await?;
        let market = self.retry.run(|| self.data.get_market_data(&area)).await?;
        info!(agent = PRICE_ESTIMATOR, count = comparables.len(), "Found comparable properties");

        let estimated_price = self.estimate(data, &comparables, &market).await;
        let confidence_score = confidence(data, &comparables);

        info!(
            agent = PRICE_ESTIMATOR,
            estimated_price,
            confidence_score,
            "Price estimation completed"
        );

        let output = json!({
            "estimated_price": estimated_price,
            "confidence_score": confidence_score,
            "comparables_used": comparables.len(),
            "market_trend": market.price_trend.as_str(),
            "price_per_sqft": market.price_per_sqft,
            "summary": format!(
                "Estimated at ${:.0} from {} comparables ({} market)",
                estimated_price,
                comparables.len(),
                market.price_trend.as_str()
            ),
        });

        Ok(StageResult::new(PRICE_ESTIMATOR, confidence_score * 10.0, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::providers::{SampleDataSource, TemplateTextGenerator};
    use std::time::Duration;

    fn property() -> Value {
        json!({
            "address": "123 Main St",
            "property_type": "single_family",
            "bedrooms": 3,
            "bathrooms": 2.0,
            "square_feet": 1500,
            "year_built": 1995,
            "city": "Austin",
            "state": "TX",
        })
    }

    fn estimator(llm: Arc<dyn TextGenerator>) -> PriceEstimator {
        PriceEstimator::new(
            Arc::new(SampleDataSource::new()),
            llm,
            RetryPolicy::new(2, Duration::from_millis(1)),
            200,
        )
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate_text(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            Err(AgentError::TransientUpstream("model down".into()))
        }
    }

    #[test]
    fn test_validate_input() {
        let agent = estimator(Arc::new(TemplateTextGenerator::new()));
        assert!(agent.validate_input(&property()));

        let mut missing = property();
        missing.as_object_mut().unwrap().remove("address");
        assert!(!agent.validate_input(&missing));

        let mut bad_bedrooms = property();
        bad_bedrooms["bedrooms"] = json!(2.5);
        assert_eq!(
            agent.check_input(&bad_bedrooms),
            Err("invalid value for field `bedrooms`".to_string())
        );

        let mut bad_bathrooms = property();
        bad_bathrooms["bathrooms"] = json!(0);
        assert!(!agent.validate_input(&bad_bathrooms));

        let mut bad_size = property();
        bad_size["square_feet"] = json!(0);
        assert!(!agent.validate_input(&bad_size));
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("the estimated price is $425,000."), Some(425_000.0));
        assert_eq!(parse_price("About 380000 given 3 beds"), Some(380_000.0));
        assert_eq!(parse_price("3 beds, 2 baths"), None);
        assert_eq!(parse_price("$0 or $512,500.50"), Some(512_500.5));
    }

    #[test]
    fn test_fallback_price() {
        let data = property();
        assert_eq!(fallback_price(&data, &[]), 300_000.0);

        let comp = Comparable {
            id: "c".into(),
            address: "x".into(),
            price: 500_000.0,
            bedrooms: 3,
            bathrooms: 2.0,
            square_feet: 2000,
            days_on_market: 10,
            year_built: None,
        };
        assert_eq!(fallback_price(&data, &[comp]), 375_000.0);
    }

    #[test]
    fn test_confidence_without_comparables() {
        let value = confidence(&property(), &[]);
        // (0 + 1 + 0.3) / 3
        assert!((value - 1.3 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyze_uses_model_answer() {
        let agent = estimator(Arc::new(TemplateTextGenerator::new()));
        let result = agent.analyze(&property()).await.unwrap();

        assert_eq!(result.agent, PRICE_ESTIMATOR);
        assert_eq!(result.number("estimated_price"), Some(425_000.0));
        assert_eq!(result.output["comparables_used"], 5);
        let confidence = result.number("confidence_score").unwrap();
        assert!((result.score - confidence * 10.0).abs() < 1e-9);
        assert!((0.0..=10.0).contains(&result.score));
    }

    #[tokio::test]
    async fn test_analyze_falls_back_when_model_fails() {
        let agent = estimator(Arc::new(FailingGenerator));
        let result = agent.analyze(&property()).await.unwrap();

        let price = result.number("estimated_price").unwrap();
        assert!(price > 0.0);
        assert_ne!(price, 425_000.0);
    }
}
