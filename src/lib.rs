//! Ranked variant storage for case review.
//!
//! Variants are stored per case and analysis type, ranked into a contiguous
//! browsing order, paged and navigated by rank, and correlated against
//! variants confirmed causative in other cases of the same institute.

pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod store;
pub mod variants;

pub use config::{ConfigError, StoreConfig};
pub use error::StoreError;
pub use model::{Case, Gene, Partition, Transcript, Variant, VariantType, normalized_id};
pub use query::{CaseScopedQueryBuilder, QueryBuilder, VariantFilter};
pub use store::{CaseRepository, RankLeases, SqliteStore, VariantStore};
pub use variants::{CausativeStream, ListOptions, PageLimit, VariantHandler};
