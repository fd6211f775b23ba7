pub mod cascade;
pub mod fetcher;
pub mod price;
pub mod sites;

pub use cascade::{ExtractionCascade, FallbackSpec, FieldSelectors, RecordProfile, StrategySpec};
pub use fetcher::ReqwestFetcher;
pub use price::{ParsedPrice, parse_price};
pub use sites::{SiteDefinition, SiteSource, load_sites, parse_sites};
