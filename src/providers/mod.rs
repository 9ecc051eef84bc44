pub mod data;
pub mod llm;
pub mod ollama;

pub use data::{
    AreaQuery, Comparable, ComparableCriteria, DataSource, MarketData, NeighborhoodData,
    PriceTrend, RentalData, SampleDataSource,
};
pub use llm::{OpenAiTextGenerator, TemplateTextGenerator, TextGenerator};
pub use ollama::OllamaTextGenerator;
