use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::agents::capability::Capability;
use crate::agents::fields;
use crate::agents::retry::RetryPolicy;
use crate::agents::DEAL_EVALUATOR;
use crate::error::Result;
use crate::providers::{AreaQuery, DataSource, MarketData, PriceTrend, RentalData};
use crate::types::StageResult;

const ROI_WEIGHT: f64 = 0.4;
const TIMING_WEIGHT: f64 = 0.3;
const RISK_WEIGHT: f64 = 0.3;

const PROPERTY_TAX_RATE: f64 = 0.012;
const INSURANCE_RATE: f64 = 0.005;
const MAINTENANCE_RATE: f64 = 0.1;
const DOWN_PAYMENT_RATE: f64 = 0.25;
const CLOSING_COST_RATE: f64 = 0.03;

/// Scores an investment from rental returns, market timing and risk, given the
/// price estimate and location score of earlier stages.
pub struct DealEvaluator {
    data: Arc<dyn DataSource>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RoiMetrics {
    pub monthly_rent: f64,
    pub annual_rent: f64,
    pub cap_rate: f64,
    pub total_expenses: f64,
    pub net_operating_income: f64,
    pub total_investment: f64,
    pub cash_on_cash_return: f64,
}

impl RoiMetrics {
    pub fn compute(property: &Value, price: f64, rental: &RentalData) -> Self {
        let monthly_rent = rental.avg_monthly_rent;
        let annual_rent = monthly_rent * 12.0;

        let property_tax = fields::f64_or(property, "property_tax", price * PROPERTY_TAX_RATE);
        let hoa_fees = fields::f64_or(property, "hoa_fees", 0.0) * 12.0;
        let total_expenses = property_tax
            + price * INSURANCE_RATE
            + annual_rent * MAINTENANCE_RATE
            + annual_rent * rental.vacancy_rate
            + hoa_fees;

        let net_operating_income = annual_rent - total_expenses;
        let total_investment = price * (DOWN_PAYMENT_RATE + CLOSING_COST_RATE);

        Self {
            monthly_rent,
            annual_rent,
            cap_rate: annual_rent / price * 100.0,
            total_expenses,
            net_operating_income,
            total_investment,
            cash_on_cash_return: net_operating_income / total_investment * 100.0,
        }
    }

    /// A 10% cash-on-cash return or better scores 10.
    pub fn score(&self) -> f64 {
        if self.cash_on_cash_return.is_finite() {
            self.cash_on_cash_return.clamp(0.0, 10.0)
        } else {
            0.0
        }
    }
}

pub(crate) fn timing_score(market: &MarketData) -> f64 {
    let mut score: f64 = 5.0;

    match market.price_trend {
        PriceTrend::Rising => score += 2.0,
        PriceTrend::Declining => score -= 1.0,
        PriceTrend::Stable => {}
    }

    if market.inventory_level < 3.0 {
        score += 1.0;
    } else if market.inventory_level > 6.0 {
        score -= 1.0;
    }

    if market.days_on_market < 30.0 {
        score += 1.0;
    } else if market.days_on_market > 60.0 {
        score -= 1.0;
    }

    score.clamp(0.0, 10.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn weight(self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 2.0,
            RiskLevel::High => 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RiskAssessment {
    pub market: RiskLevel,
    pub property: RiskLevel,
    pub location: RiskLevel,
    pub financial: RiskLevel,
    pub overall: RiskLevel,
    pub risk_score: f64,
}

impl RiskAssessment {
    pub fn evaluate(property: &Value, price: f64, location_score: f64) -> Self {
        let market = if price > 1_000_000.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let year_built = property
            .get("year_built")
            .and_then(Value::as_i64)
            .unwrap_or(2000);
        let property_risk = if year_built < 1960 {
            RiskLevel::High
        } else if year_built < 1980 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let location = if location_score < 5.0 {
            RiskLevel::High
        } else if location_score < 7.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let financial = if price > 500_000.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let average =
            (market.weight() + property_risk.weight() + location.weight() + financial.weight()) / 4.0;
        let overall = if average <= 1.5 {
            RiskLevel::Low
        } else if average <= 2.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        };

        Self {
            market,
            property: property_risk,
            location,
            financial,
            overall,
            // low risk scores high
            risk_score: (10.0 - average * 2.0).clamp(0.0, 10.0),
        }
    }
}

pub(crate) fn investment_strategy(deal_score: f64) -> &'static str {
    if deal_score >= 7.0 {
        "buy"
    } else if deal_score >= 4.0 {
        "hold"
    } else {
        "pass"
    }
}

impl DealEvaluator {
    pub fn new(data: Arc<dyn DataSource>, retry: RetryPolicy) -> Self {
        Self { data, retry }
    }
}

#[async_trait]
impl Capability for DealEvaluator {
    fn name(&self) -> &str {
        DEAL_EVALUATOR
    }

    fn check_input(&self, data: &Value) -> std::result::Result<(), String> {
        fields::require_object(DEAL_EVALUATOR, data, "property_data")?;
        fields::require_positive(DEAL_EVALUATOR, data, "price_estimate")?;
        fields::require_number(DEAL_EVALUATOR, data, "location_score")
    }

    async fn analyze(&self, data: &Value) -> Result<StageResult> {
        let property = &data["property_data"];
        let price = fields::f64_or(data, "price_estimate", 0.0);
        let location_score = fields::f64_or(data, "location_score", 0.0);

        let mut area = AreaQuery::new(
            fields::str_or(property, "city", ""),
            fields::str_or(property, "state", ""),
        );
        area.zip_code = property
            .get("zip_code")
            .and_then(Value::as_str)
            .map(str::to_string);
        let bedrooms = property
            .get("bedrooms")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32;

        info!(agent = DEAL_EVALUATOR, price, location_score, "Evaluating deal");

        let rental = self
            .retry
            .run(|| self.data.get_rental_data(&area, bedrooms))
            .await?;
        let market = self.retry.run(|| self.data.get_market_data(&area)).await?;

        let roi = RoiMetrics::compute(property, price, &rental);
        let timing = timing_score(&market);
        let risk = RiskAssessment::evaluate(property, price, location_score);

        let deal_score =
            (roi.score() * ROI_WEIGHT + timing * TIMING_WEIGHT + risk.risk_score * RISK_WEIGHT)
                .clamp(0.0, 10.0);
        let strategy = investment_strategy(deal_score);

        info!(agent = DEAL_EVALUATOR, deal_score, strategy, "Deal evaluation completed");

        let output = json!({
            "deal_score": deal_score,
            "investment_strategy": strategy,
            "roi_metrics": roi,
            "market_timing": {
                "price_trend": market.price_trend.as_str(),
                "inventory_level": market.inventory_level,
                "days_on_market": market.days_on_market,
                "timing_score": timing,
            },
            "risk_assessment": risk,
        });

        Ok(StageResult::new(DEAL_EVALUATOR, deal_score, output))
    }
}
