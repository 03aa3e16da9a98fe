pub mod api;
pub mod assisted;
pub mod dynamic;
pub mod registry;
pub mod static_page;
pub mod traits;

pub use registry::StrategyRegistry;
pub use traits::{AnalyzedListing, RawListing, ScrapeStrategy};
