use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::model::Partition;

pub const LEASE_TTL_SECS_DEFAULT: i64 = 300;

static LEASE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Ranking status of a partition.
///
/// `Assigning` outside a live lease means a run was interrupted and the
/// partition must be re-ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Unranked,
    Assigning,
    Ranked,
}

impl PartitionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unranked => "unranked",
            Self::Assigning => "assigning",
            Self::Ranked => "ranked",
        }
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionState {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "unranked" => Ok(Self::Unranked),
            "assigning" => Ok(Self::Assigning),
            "ranked" => Ok(Self::Ranked),
            _ => Err(StoreError::InvalidState(format!(
                "unknown partition state `{raw}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired,
    TookOverStale { previous_holder: String },
    Held { holder: String },
}

/// Cross-process mutual exclusion for rank assignment, one lease per partition.
pub trait RankLeases {
    /// Claims the partition unless a lease newer than `stale_before` exists.
    fn try_acquire_lease(
        &self,
        partition: &Partition,
        holder: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError>;

    /// Refreshes the lease timestamp. False when `holder` no longer owns it.
    fn renew_lease(&self, partition: &Partition, holder: &str) -> Result<bool, StoreError>;

    /// No-op when `holder` no longer owns the lease.
    fn release_lease(&self, partition: &Partition, holder: &str) -> Result<(), StoreError>;

    fn set_partition_state(
        &self,
        partition: &Partition,
        state: PartitionState,
    ) -> Result<(), StoreError>;

    /// Moves the partition from `from` to `to`. False, with nothing written,
    /// when the partition is in any other state.
    fn transition_partition_state(
        &self,
        partition: &Partition,
        from: PartitionState,
        to: PartitionState,
    ) -> Result<bool, StoreError>;

    fn partition_state(&self, partition: &Partition) -> Result<Option<PartitionState>, StoreError>;
}

/// Held rank lease; released on drop.
pub struct RankLease<'a, L: RankLeases + ?Sized> {
    leases: &'a L,
    partition: Partition,
    holder: String,
}

impl<'a, L: RankLeases + ?Sized> RankLease<'a, L> {
    pub fn acquire(leases: &'a L, partition: &Partition, ttl: Duration) -> Result<Self, StoreError> {
        let holder = next_holder_id();
        let stale_before = Utc::now() - ttl;
        match leases.try_acquire_lease(partition, &holder, stale_before)? {
            LeaseOutcome::Acquired => {}
            LeaseOutcome::TookOverStale { previous_holder } => {
                tracing::warn!(
                    %partition,
                    previous_holder = %previous_holder,
                    "took over stale rank lease"
                );
            }
            LeaseOutcome::Held { holder: current } => {
                tracing::debug!(%partition, holder = %current, "rank lease held elsewhere");
                return Err(StoreError::PartitionLocked {
                    partition: partition.clone(),
                });
            }
        }
        Ok(Self {
            leases,
            partition: partition.clone(),
            holder,
        })
    }

    /// Extends the lease, or fails with `LeaseLost` once another assigner has
    /// taken it over.
    pub fn renew(&self) -> Result<(), StoreError> {
        if self.leases.renew_lease(&self.partition, &self.holder)? {
            return Ok(());
        }
        tracing::warn!(partition = %self.partition, holder = %self.holder, "rank lease lost");
        Err(StoreError::LeaseLost {
            partition: self.partition.clone(),
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }
}

impl<L: RankLeases + ?Sized> Drop for RankLease<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.leases.release_lease(&self.partition, &self.holder) {
            tracing::warn!(partition = %self.partition, error = %err, "failed to release rank lease");
        }
    }
}

fn next_holder_id() -> String {
    let counter = LEASE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let micros = Utc::now().timestamp_micros();
    format!("{}.{micros}.{counter}", std::process::id())
}
