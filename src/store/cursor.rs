use std::collections::VecDeque;

use crate::error::StoreError;
use crate::model::Variant;
use crate::store::VariantStore;
use crate::store::filter::{Filter, FindOptions, SortKey};

pub const FETCH_BATCH_SIZE_DEFAULT: usize = 500;

/// Pull-based iterator over a filtered result set, fetched in batches.
///
/// Each batch is a fresh `skip`/`limit` query, so concurrent writes between
/// batches are visible. Dropping the cursor stops all work.
pub struct VariantCursor<'a, S: VariantStore + ?Sized> {
    store: &'a S,
    filter: Filter,
    sort: SortKey,
    next_skip: usize,
    batch_size: usize,
    buffer: VecDeque<Variant>,
    exhausted: bool,
}

impl<'a, S: VariantStore + ?Sized> VariantCursor<'a, S> {
    pub fn new(store: &'a S, filter: Filter, sort: SortKey, batch_size: usize) -> Self {
        Self {
            store,
            filter,
            sort,
            next_skip: 0,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_batch(&mut self) -> Result<(), StoreError> {
        let options = FindOptions {
            sort: self.sort,
            skip: self.next_skip,
            limit: Some(self.batch_size),
        };
        let batch = self.store.find(&self.filter, &options)?;
        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        self.next_skip += batch.len();
        self.buffer.extend(batch);
        Ok(())
    }
}

impl<S: VariantStore + ?Sized> Iterator for VariantCursor<'_, S> {
    type Item = Result<Variant, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_batch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
