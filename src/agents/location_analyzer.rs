use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::agents::capability::Capability;
use crate::agents::fields;
use crate::agents::retry::RetryPolicy;
use crate::agents::LOCATION_ANALYZER;
use crate::error::Result;
use crate::providers::{AreaQuery, DataSource, NeighborhoodData};
use crate::types::StageResult;

const SAFETY_WEIGHT: f64 = 0.35;
const SCHOOL_WEIGHT: f64 = 0.35;
const AMENITY_WEIGHT: f64 = 0.2;
const INCOME_WEIGHT: f64 = 0.1;

/// Median income that scores a full 10.
const INCOME_CEILING: f64 = 100_000.0;

/// Scores a neighborhood from safety, schools, amenities and income.
pub struct LocationAnalyzer {
    data: Arc<dyn DataSource>,
    retry: RetryPolicy,
}

impl LocationAnalyzer {
    pub fn new(data: Arc<dyn DataSource>, retry: RetryPolicy) -> Self {
        Self { data, retry }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LocationComponents {
    pub safety: f64,
    pub schools: f64,
    pub amenities: f64,
    pub income: f64,
}

impl LocationComponents {
    pub fn from_neighborhood(n: &NeighborhoodData) -> Self {
        let schools = if n.school_ratings.is_empty() {
            5.0
        } else {
            n.school_ratings.iter().sum::<f64>() / n.school_ratings.len() as f64
        };

        Self {
            safety: n.safety_score.clamp(0.0, 10.0),
            schools: schools.clamp(0.0, 10.0),
            // ratings are out of 5
            amenities: (n.amenity_rating * 2.0).clamp(0.0, 10.0),
            income: (n.median_income / INCOME_CEILING * 10.0).clamp(0.0, 10.0),
        }
    }

    pub fn score(&self) -> f64 {
        let score = self.safety * SAFETY_WEIGHT
            + self.schools * SCHOOL_WEIGHT
            + self.amenities * AMENITY_WEIGHT
            + self.income * INCOME_WEIGHT;
        score.clamp(0.0, 10.0)
    }
}

#[async_trait]
impl Capability for LocationAnalyzer {
    fn name(&self) -> &str {
        LOCATION_ANALYZER
    }

    fn agent_type(&self) -> &str {
        "data"
    }

    fn check_input(&self, data: &Value) -> std::result::Result<(), String> {
        fields::require_str(LOCATION_ANALYZER, data, "city")?;
        fields::require_str(LOCATION_ANALYZER, data, "state")
    }

    async fn analyze(&self, data: &Value) -> Result<StageResult> {
        let mut area = AreaQuery::new(
            fields::str_or(data, "city", ""),
            fields::str_or(data, "state", ""),
        );
        area.zip_code = data
            .get("zip_code")
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(agent = LOCATION_ANALYZER, city = %area.city, state = %area.state, "Analyzing location");

        let neighborhood = self.retry.run(|| self.data.get_neighborhood(&area)).await?;
        let components = LocationComponents::from_neighborhood(&neighborhood);
        let location_score = components.score();

        info!(agent = LOCATION_ANALYZER, location_score, "Location analysis completed");

        let output = json!({
            "location_score": location_score,
            "safety_score": components.safety,
            "school_score": components.schools,
            "amenity_score": components.amenities,
            "income_score": components.income,
            "population": neighborhood.population,
            "median_income": neighborhood.median_income,
            "amenity_count": neighborhood.amenity_count,
        });

        Ok(StageResult::new(LOCATION_ANALYZER, location_score, output))
    }
}
