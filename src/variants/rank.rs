use chrono::Duration;

use crate::error::StoreError;
use crate::model::{Case, Partition, Variant, VariantType};
use crate::query::{QueryBuilder, VariantFilter};
use crate::store::filter::{Field, Filter, FindOptions};
use crate::store::{PartitionState, RankLease, RankLeases, VariantStore};
use crate::variants::VariantHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    const fn label(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }
}

impl<S: VariantStore + RankLeases, Q: QueryBuilder> VariantHandler<S, Q> {
    /// Writes ranks `1..=N` over a partition in its current listing order.
    ///
    /// Holds the partition's rank lease for the whole run and renews it every
    /// `fetch_batch_size` writes. The partition is `assigning` from before the
    /// snapshot is read until the last write. A failure after the first write,
    /// including a lost lease, returns `PartitionInconsistency`. If the
    /// partition changed during the run it is left flagged, not `ranked`.
    pub fn assign_ranks(&self, case: &Case, variant_type: VariantType) -> Result<usize, StoreError> {
        let partition = Partition::new(case.case_id.clone(), variant_type);
        let lease = RankLease::acquire(
            &self.store,
            &partition,
            Duration::seconds(self.config.lease_ttl_secs),
        )?;
        self.store
            .set_partition_state(&partition, PartitionState::Assigning)?;

        let query = self.query_builder.build_query(
            &case.case_id,
            Some(&VariantFilter::of_type(variant_type)),
            None,
        );
        let document_ids = self
            .store
            .find(&query, &FindOptions::by_rank())?
            .into_iter()
            .map(|variant| variant.document_id)
            .collect::<Vec<_>>();
        let total = document_ids.len();
        tracing::info!(%partition, total, "assigning variant ranks");

        let renew_every = self.config.fetch_batch_size.max(1);
        for (index, document_id) in document_ids.iter().enumerate() {
            let outcome = renew_on_batch(&lease, index, renew_every)
                .and_then(|()| {
                    u32::try_from(index + 1).map_err(|_| {
                        StoreError::InvalidState(format!("rank overflow at {document_id}"))
                    })
                })
                .and_then(|rank| self.store.set_rank(document_id, rank));
            let source = match outcome {
                Ok(true) => continue,
                Ok(false) => StoreError::InvalidState(format!(
                    "variant {document_id} disappeared during rank assignment"
                )),
                Err(err) => err,
            };
            return Err(inconsistency(partition, index, total, source));
        }
        if let Err(source) = lease.renew() {
            return Err(inconsistency(partition, total, total, source));
        }

        let completed = self.store.transition_partition_state(
            &partition,
            PartitionState::Assigning,
            PartitionState::Ranked,
        )?;
        if completed {
            tracing::info!(%partition, ranked = total, "variant ranks assigned");
        } else {
            tracing::warn!(
                %partition,
                ranked = total,
                "partition changed during rank assignment, left flagged for re-ranking"
            );
        }
        Ok(total)
    }

    /// True until a rank assignment has completed since the last change.
    pub fn needs_rank_assignment(
        &self,
        case_id: &str,
        variant_type: VariantType,
    ) -> Result<bool, StoreError> {
        let state = self
            .store
            .partition_state(&Partition::new(case_id, variant_type))?;
        Ok(state != Some(PartitionState::Ranked))
    }
}

impl<S: VariantStore, Q> VariantHandler<S, Q> {
    /// Variant ranked directly after `document_id` in its partition.
    ///
    /// `None` when either the subject or its successor is absent. An unranked
    /// subject counts as rank 0, so its successor is rank 1.
    pub fn next_variant(&self, document_id: &str) -> Result<Option<Variant>, StoreError> {
        self.neighbor(document_id, Direction::Next)
    }

    pub fn previous_variant(&self, document_id: &str) -> Result<Option<Variant>, StoreError> {
        self.neighbor(document_id, Direction::Previous)
    }

    pub fn neighbor(
        &self,
        document_id: &str,
        direction: Direction,
    ) -> Result<Option<Variant>, StoreError> {
        let Some(subject) = self.get_variant(document_id)? else {
            tracing::debug!(document_id, "no variant to navigate from");
            return Ok(None);
        };
        tracing::info!(
            display_name = %subject.display_name,
            direction = direction.label(),
            "fetching neighbouring variant"
        );

        let rank = i64::from(subject.variant_rank.unwrap_or(0));
        let target = match direction {
            Direction::Next => rank + 1,
            Direction::Previous => rank - 1,
        };
        if target < 0 {
            return Ok(None);
        }
        self.store
            .find_one(&Filter::partition(&subject.partition()).eq(Field::VariantRank, target))
    }
}

fn renew_on_batch<L: RankLeases + ?Sized>(
    lease: &RankLease<'_, L>,
    index: usize,
    every: usize,
) -> Result<(), StoreError> {
    if index > 0 && index % every == 0 {
        lease.renew()?;
    }
    Ok(())
}

fn inconsistency(partition: Partition, ranked: usize, total: usize, source: StoreError) -> StoreError {
    tracing::error!(%partition, ranked, total, error = %source, "rank assignment aborted");
    StoreError::PartitionInconsistency {
        partition,
        ranked,
        total,
        source: Box::new(source),
    }
}
