//! Storage seams consumed by the variant handler.
//!
//! `VariantStore` is the document store, `CaseRepository` the read side of
//! case storage and `RankLeases` the per-partition mutual exclusion used by
//! rank assignment. `SqliteStore` implements all three.

pub mod cursor;
pub mod filter;
pub mod lease;
pub mod sqlite;

use crate::error::StoreError;
use crate::model::{Case, Variant};

pub use cursor::VariantCursor;
pub use filter::{Field, FieldValue, Filter, FindOptions, SortKey, Term};
pub use lease::{LeaseOutcome, PartitionState, RankLease, RankLeases};
pub use sqlite::SqliteStore;

pub trait VariantStore {
    fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Variant>, StoreError>;

    /// First match by rank, if any.
    fn find_one(&self, filter: &Filter) -> Result<Option<Variant>, StoreError> {
        Ok(self
            .find(filter, &FindOptions::by_rank().limit(1))?
            .into_iter()
            .next())
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError>;

    /// Atomic insert-or-replace keyed by `document_id`.
    fn upsert(&self, variant: &Variant) -> Result<(), StoreError>;

    /// Returns `false` when no variant has this id.
    fn set_rank(&self, document_id: &str, rank: u32) -> Result<bool, StoreError>;

    fn delete(&self, filter: &Filter) -> Result<usize, StoreError>;
}

pub trait CaseRepository {
    fn case(&self, case_id: &str) -> Result<Option<Case>, StoreError>;

    /// Cases owned by `institute_id`, ordered by case id.
    fn cases_for(&self, institute_id: &str, has_causatives: bool)
    -> Result<Vec<Case>, StoreError>;
}
