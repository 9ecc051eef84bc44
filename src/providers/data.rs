use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparableCriteria {
    pub address: String,
    pub property_type: String,
    pub bedrooms: u32,
    pub bathrooms: f64,
    pub square_feet: u32,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparable {
    pub id: String,
    pub address: String,
    pub price: f64,
    pub bedrooms: u32,
    pub bathrooms: f64,
    pub square_feet: u32,
    pub days_on_market: u32,
    pub year_built: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaQuery {
    pub city: String,
    pub state: String,
    pub zip_code: Option<String>,
}

impl AreaQuery {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
            zip_code: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTrend {
    Rising,
    Stable,
    Declining,
}

impl PriceTrend {
    pub fn as_str(&self) -> &str {
        match self {
            PriceTrend::Rising => "rising",
            PriceTrend::Stable => "stable",
            PriceTrend::Declining => "declining",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub avg_price: f64,
    pub price_per_sqft: f64,
    pub days_on_market: f64,
    /// Months of inventory.
    pub inventory_level: f64,
    pub price_trend: PriceTrend,
    pub appreciation_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalData {
    pub avg_monthly_rent: f64,
    pub vacancy_rate: f64,
    pub rent_trend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborhoodData {
    pub population: u64,
    pub median_income: f64,
    /// 0-10, higher is safer.
    pub safety_score: f64,
    /// 0-10 per nearby school.
    pub school_ratings: Vec<f64>,
    pub amenity_count: usize,
    /// 0-5 average review rating of nearby amenities.
    pub amenity_rating: f64,
}

/// Source of comparables and area statistics. Calls are safe to retry and
/// failures are transient unless stated otherwise.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn get_comparables(&self, criteria: &ComparableCriteria) -> Result<Vec<Comparable>>;
    async fn get_market_data(&self, area: &AreaQuery) -> Result<MarketData>;
    async fn get_rental_data(&self, area: &AreaQuery, bedrooms: u32) -> Result<RentalData>;
    async fn get_neighborhood(&self, area: &AreaQuery) -> Result<NeighborhoodData>;
}

/// Deterministic offline data, shaped like a typical mid-size US market.
#[derive(Debug, Clone, Default)]
pub struct SampleDataSource;

impl SampleDataSource {
    pub fn new() -> Self {
        Self
    }

    fn is_new_york(area: &AreaQuery) -> bool {
        area.city.to_lowercase().contains("new york") || area.state.eq_ignore_ascii_case("ny")
    }

    fn is_california(area: &AreaQuery) -> bool {
        area.state.eq_ignore_ascii_case("ca") || area.state.eq_ignore_ascii_case("california")
    }
}

#[async_trait]
impl DataSource for SampleDataSource {
    async fn get_comparables(&self, criteria: &ComparableCriteria) -> Result<Vec<Comparable>> {
        let count = criteria.limit.min(5);
        let comparables = (0..count)
            .map(|i| {
                let idx = i as u32;
                Comparable {
                    id: format!("comp_{}", i + 1),
                    address: format!("{} Main St", 1000 + i * 100),
                    price: 400_000.0 + 25_000.0 * i as f64,
                    bedrooms: criteria.bedrooms + idx % 2,
                    bathrooms: criteria.bathrooms + 0.5 * (idx % 3) as f64,
                    square_feet: criteria.square_feet + 100 * idx,
                    days_on_market: 15 + 5 * idx,
                    year_built: Some(1990 + 5 * i as i32),
                }
            })
            .collect();
        Ok(comparables)
    }

    async fn get_market_data(&self, area: &AreaQuery) -> Result<MarketData> {
        let mut data = MarketData {
            avg_price: 425_000.0,
            price_per_sqft: 250.0,
            days_on_market: 25.0,
            inventory_level: 4.2,
            price_trend: PriceTrend::Rising,
            appreciation_rate: 0.05,
        };

        if Self::is_new_york(area) {
            data.avg_price = 750_000.0;
            data.price_per_sqft = 450.0;
            data.price_trend = PriceTrend::Stable;
        } else if Self::is_california(area) {
            data.avg_price = 850_000.0;
            data.price_per_sqft = 550.0;
            data.appreciation_rate = 0.08;
        }

        Ok(data)
    }

    async fn get_rental_data(&self, area: &AreaQuery, bedrooms: u32) -> Result<RentalData> {
        let base_rent = 1500.0 + 500.0 * bedrooms as f64;
        let avg_monthly_rent = if Self::is_new_york(area) {
            base_rent * 2.5
        } else {
            base_rent
        };

        Ok(RentalData {
            avg_monthly_rent,
            vacancy_rate: 0.05,
            rent_trend: "increasing".to_string(),
        })
    }

    async fn get_neighborhood(&self, area: &AreaQuery) -> Result<NeighborhoodData> {
        let (population, median_income) = if Self::is_new_york(area) {
            (8_500_000, 85_000.0)
        } else {
            (50_000, 65_000.0)
        };

        Ok(NeighborhoodData {
            population,
            median_income,
            safety_score: 7.8,
            school_ratings: vec![8.5, 7.8, 8.2],
            amenity_count: 6,
            amenity_rating: 4.4,
        })
    }
}
