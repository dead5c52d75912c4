//! Variant retrieval, lifecycle, ranking and causative correlation.
//!
//! All operations live on [`VariantHandler`], which owns an injected store and
//! query builder. Each capability is gated on the store traits it needs.

pub mod causative;
pub mod rank;

use crate::config::{PAGE_SIZE_DEFAULT, StoreConfig};
use crate::error::StoreError;
use crate::model::{Partition, Variant, VariantType};
use crate::query::{CaseScopedQueryBuilder, QueryBuilder, VariantFilter};
use crate::store::filter::{Field, Filter, FindOptions, SortKey};
use crate::store::{PartitionState, RankLeases, SqliteStore, VariantCursor, VariantStore};

pub use causative::CausativeStream;
pub use rank::Direction;

/// How many rows a listing may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLimit {
    /// The whole result set; offset is ignored.
    All,
    Rows(usize),
}

impl PageLimit {
    /// Accepts the legacy `-1` sentinel for "no limit".
    pub fn from_raw(raw: i64) -> Result<Self, StoreError> {
        match raw {
            -1 => Ok(Self::All),
            _ => usize::try_from(raw)
                .map(Self::Rows)
                .map_err(|_| StoreError::InvalidLimit(raw)),
        }
    }
}

impl Default for PageLimit {
    fn default() -> Self {
        Self::Rows(PAGE_SIZE_DEFAULT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub filter: Option<VariantFilter>,
    pub explicit_ids: Option<Vec<String>>,
    pub limit: PageLimit,
    pub offset: usize,
}

impl ListOptions {
    #[must_use]
    pub fn filter(mut self, filter: VariantFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn explicit_ids<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.explicit_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: PageLimit) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Store window for this listing.
    ///
    /// With explicit ids the window is one row per id. Otherwise the cutoff
    /// is `offset + limit` rows with `offset` skipped, so a page asks the
    /// store for more rows than it returns.
    fn window(&self, explicit_ids: Option<&[String]>) -> FindOptions {
        match (explicit_ids, self.limit) {
            (Some(ids), _) => FindOptions::by_rank().skip(self.offset).limit(ids.len()),
            (None, PageLimit::All) => FindOptions::by_rank(),
            (None, PageLimit::Rows(limit)) => FindOptions::by_rank()
                .skip(self.offset)
                .limit(self.offset + limit),
        }
    }
}

pub struct VariantHandler<S, Q = CaseScopedQueryBuilder> {
    store: S,
    query_builder: Q,
    config: StoreConfig,
}

impl<S> VariantHandler<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, StoreConfig::default())
    }

    pub fn with_config(store: S, config: StoreConfig) -> Self {
        Self::with_query_builder(store, CaseScopedQueryBuilder, config)
    }
}

impl VariantHandler<SqliteStore> {
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let store = SqliteStore::open_with_config(&config)?;
        Ok(Self::with_config(store, config))
    }
}

impl<S, Q> VariantHandler<S, Q> {
    pub fn with_query_builder(store: S, query_builder: Q, config: StoreConfig) -> Self {
        Self {
            store,
            query_builder,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Listing options with the configured page size.
    pub fn list_options(&self) -> ListOptions {
        ListOptions::default().limit(PageLimit::Rows(self.config.page_size))
    }
}

impl<S: VariantStore, Q: QueryBuilder> VariantHandler<S, Q> {
    /// Variants of a case ordered by rank. See [`ListOptions`] for windowing.
    pub fn list_variants(
        &self,
        case_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Variant>, StoreError> {
        tracing::info!(case_id, "fetching variants");
        let explicit_ids = options
            .explicit_ids
            .as_deref()
            .filter(|ids| !ids.is_empty());
        let query = self
            .query_builder
            .build_query(case_id, options.filter.as_ref(), explicit_ids);
        self.store.find(&query, &options.window(explicit_ids))
    }

    /// Lazily walks every matching variant in rank order.
    pub fn stream_variants(
        &self,
        case_id: &str,
        filter: Option<&VariantFilter>,
    ) -> VariantCursor<'_, S> {
        let query = self.query_builder.build_query(case_id, filter, None);
        VariantCursor::new(
            &self.store,
            query,
            SortKey::Rank,
            self.config.fetch_batch_size,
        )
    }
}

impl<S: VariantStore, Q> VariantHandler<S, Q> {
    pub fn get_variant(&self, document_id: &str) -> Result<Option<Variant>, StoreError> {
        self.store
            .find_one(&Filter::new().eq(Field::DocumentId, document_id))
    }

    pub fn count_variants(
        &self,
        case_id: &str,
        variant_type: VariantType,
    ) -> Result<usize, StoreError> {
        self.store
            .count(&Filter::partition(&Partition::new(case_id, variant_type)))
    }
}

impl<S: VariantStore + RankLeases, Q> VariantHandler<S, Q> {
    /// Insert or replace by `document_id`. An unranked save marks its
    /// partition for re-ranking.
    pub fn save(&self, variant: &Variant) -> Result<(), StoreError> {
        tracing::debug!(document_id = %variant.document_id, "saving variant");
        self.store.upsert(variant)?;
        if variant.variant_rank.is_none() {
            self.store
                .set_partition_state(&variant.partition(), PartitionState::Unranked)?;
        }
        Ok(())
    }

    /// Removes one analysis type of a case before re-ingestion.
    pub fn delete_by_type(
        &self,
        case_id: &str,
        variant_type: VariantType,
    ) -> Result<usize, StoreError> {
        let partition = Partition::new(case_id, variant_type);
        tracing::info!(%partition, "deleting old variants");
        let deleted = self.store.delete(&Filter::partition(&partition))?;
        self.store
            .set_partition_state(&partition, PartitionState::Unranked)?;
        tracing::info!(%partition, deleted, "variants deleted");
        Ok(deleted)
    }
}
