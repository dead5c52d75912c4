use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{
    Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter,
};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{Case, Gene, Partition, Variant};
use crate::store::filter::{FieldValue, Filter, FindOptions, SortKey, Term};
use crate::store::lease::{LeaseOutcome, PartitionState, RankLeases};
use crate::store::{CaseRepository, VariantStore};

const SCHEMA_VERSION: i64 = 1;

const VARIANT_COLUMNS: &str = "document_id, case_id, institute, variant_type, display_name,
    chromosome, position, reference, alternative, variant_rank, payload";

/// Annotation fields stored as one JSON column.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VariantPayload {
    #[serde(default)]
    genes: Vec<Gene>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens `config.database`, or an in-memory store when none is configured.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = match &config.database {
            Some(path) => Self::open(path)?,
            None => Self::open_in_memory()?,
        };
        store
            .conn
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            self.create_schema_v1()?;
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        } else if version == SCHEMA_VERSION {
            self.create_schema_v1()?;
        } else {
            return Err(StoreError::InvalidState(format!(
                "unsupported schema version {version}"
            )));
        }
        Ok(())
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS variants (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL UNIQUE,
                case_id TEXT NOT NULL,
                institute TEXT NOT NULL,
                variant_type TEXT NOT NULL CHECK (variant_type IN ('clinical', 'research')),
                display_name TEXT NOT NULL,
                chromosome TEXT NOT NULL,
                position INTEGER NOT NULL,
                reference TEXT NOT NULL,
                alternative TEXT NOT NULL,
                variant_rank INTEGER CHECK (variant_rank IS NULL OR variant_rank >= 0),
                payload TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_variants_partition_rank
                ON variants(case_id, variant_type, variant_rank);
            CREATE INDEX IF NOT EXISTS idx_variants_case_display
                ON variants(case_id, display_name);

            CREATE TABLE IF NOT EXISTS cases (
                case_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                owner TEXT NOT NULL,
                institute TEXT NOT NULL,
                causatives TEXT NOT NULL DEFAULT '[]',
                causative_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_cases_owner ON cases(owner, causative_count);

            CREATE TABLE IF NOT EXISTS rank_partitions (
                case_id TEXT NOT NULL,
                variant_type TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'unranked',
                lease_holder TEXT,
                lease_acquired_at TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (case_id, variant_type)
            );
            ",
        )
    }

    pub fn upsert_case(&self, case: &Case) -> Result<(), StoreError> {
        let causatives = serde_json::to_string(&case.causatives)?;
        self.conn.execute(
            "INSERT INTO cases (case_id, display_name, owner, institute, causatives, causative_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(case_id) DO UPDATE SET
                display_name = excluded.display_name,
                owner = excluded.owner,
                institute = excluded.institute,
                causatives = excluded.causatives,
                causative_count = excluded.causative_count",
            params![
                case.case_id,
                case.display_name,
                case.owner,
                case.institute,
                causatives,
                case.causatives.len() as i64
            ],
        )?;
        Ok(())
    }
}

impl VariantStore for SqliteStore {
    fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Variant>, StoreError> {
        let (clause, values) = where_clause(filter)?;
        let order = match options.sort {
            SortKey::Rank => "variant_rank ASC, seq ASC",
            SortKey::Insertion => "seq ASC",
        };
        let limit = options
            .limit
            .map_or_else(|| "-1".to_string(), |limit| limit.to_string());
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE {clause} ORDER BY {order} LIMIT {limit} OFFSET {}",
            options.skip
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_variant(row)?);
        }
        Ok(out)
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        let (clause, values) = where_clause(filter)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM variants WHERE {clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn upsert(&self, variant: &Variant) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&VariantPayload {
            genes: variant.genes.clone(),
        })?;
        self.conn.execute(
            "INSERT INTO variants (
                document_id, case_id, institute, variant_type, display_name,
                chromosome, position, reference, alternative, variant_rank, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(document_id) DO UPDATE SET
                case_id = excluded.case_id,
                institute = excluded.institute,
                variant_type = excluded.variant_type,
                display_name = excluded.display_name,
                chromosome = excluded.chromosome,
                position = excluded.position,
                reference = excluded.reference,
                alternative = excluded.alternative,
                variant_rank = excluded.variant_rank,
                payload = excluded.payload",
            params![
                variant.document_id,
                variant.case_id,
                variant.institute,
                variant.variant_type.as_str(),
                variant.display_name,
                variant.chromosome,
                variant.position,
                variant.reference,
                variant.alternative,
                variant.variant_rank,
                payload
            ],
        )?;
        Ok(())
    }

    fn set_rank(&self, document_id: &str, rank: u32) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE variants SET variant_rank = ?2 WHERE document_id = ?1",
            params![document_id, rank],
        )?;
        Ok(changed == 1)
    }

    fn delete(&self, filter: &Filter) -> Result<usize, StoreError> {
        let (clause, values) = where_clause(filter)?;
        let deleted = self.conn.execute(
            &format!("DELETE FROM variants WHERE {clause}"),
            params_from_iter(values.iter()),
        )?;
        Ok(deleted)
    }
}

impl CaseRepository for SqliteStore {
    fn case(&self, case_id: &str) -> Result<Option<Case>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT case_id, display_name, owner, institute, causatives
                 FROM cases WHERE case_id = ?1",
                params![case_id],
                raw_case,
            )
            .optional()?;
        row.map(RawCase::into_case).transpose()
    }

    fn cases_for(
        &self,
        institute_id: &str,
        has_causatives: bool,
    ) -> Result<Vec<Case>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT case_id, display_name, owner, institute, causatives
             FROM cases
             WHERE owner = ?1 AND (?2 = 0 OR causative_count > 0)
             ORDER BY case_id ASC",
        )?;
        let mut rows = stmt.query(params![institute_id, has_causatives])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(raw_case(row)?.into_case()?);
        }
        Ok(out)
    }
}

impl RankLeases for SqliteStore {
    fn try_acquire_lease(
        &self,
        partition: &Partition,
        holder: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError> {
        // Holder read and claim share one write transaction.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let previous_holder = lease_holder(&tx, partition)?;

        let now = timestamp(Utc::now());
        let changed = tx.execute(
            "INSERT INTO rank_partitions (case_id, variant_type, state, lease_holder, lease_acquired_at, updated_at)
             VALUES (?1, ?2, 'unranked', ?3, ?4, ?4)
             ON CONFLICT(case_id, variant_type) DO UPDATE SET
                lease_holder = excluded.lease_holder,
                lease_acquired_at = excluded.lease_acquired_at,
                updated_at = excluded.updated_at
             WHERE rank_partitions.lease_holder IS NULL
                OR rank_partitions.lease_acquired_at < ?5",
            params![
                partition.case_id,
                partition.variant_type.as_str(),
                holder,
                now,
                timestamp(stale_before)
            ],
        )?;

        tx.commit()?;

        Ok(match (changed, previous_holder) {
            (0, holder) => LeaseOutcome::Held {
                holder: holder.unwrap_or_default(),
            },
            (_, Some(previous_holder)) => LeaseOutcome::TookOverStale { previous_holder },
            (_, None) => LeaseOutcome::Acquired,
        })
    }

    fn renew_lease(&self, partition: &Partition, holder: &str) -> Result<bool, StoreError> {
        let now = timestamp(Utc::now());
        let changed = self.conn.execute(
            "UPDATE rank_partitions
             SET lease_acquired_at = ?4, updated_at = ?4
             WHERE case_id = ?1 AND variant_type = ?2 AND lease_holder = ?3",
            params![partition.case_id, partition.variant_type.as_str(), holder, now],
        )?;
        Ok(changed == 1)
    }

    fn release_lease(&self, partition: &Partition, holder: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE rank_partitions
             SET lease_holder = NULL, lease_acquired_at = NULL, updated_at = ?4
             WHERE case_id = ?1 AND variant_type = ?2 AND lease_holder = ?3",
            params![
                partition.case_id,
                partition.variant_type.as_str(),
                holder,
                timestamp(Utc::now())
            ],
        )?;
        Ok(())
    }

    fn set_partition_state(
        &self,
        partition: &Partition,
        state: PartitionState,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO rank_partitions (case_id, variant_type, state, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(case_id, variant_type) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at",
            params![
                partition.case_id,
                partition.variant_type.as_str(),
                state.as_str(),
                timestamp(Utc::now())
            ],
        )?;
        Ok(())
    }

    fn transition_partition_state(
        &self,
        partition: &Partition,
        from: PartitionState,
        to: PartitionState,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE rank_partitions
             SET state = ?4, updated_at = ?5
             WHERE case_id = ?1 AND variant_type = ?2 AND state = ?3",
            params![
                partition.case_id,
                partition.variant_type.as_str(),
                from.as_str(),
                to.as_str(),
                timestamp(Utc::now())
            ],
        )?;
        Ok(changed == 1)
    }

    fn partition_state(&self, partition: &Partition) -> Result<Option<PartitionState>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM rank_partitions WHERE case_id = ?1 AND variant_type = ?2",
                params![partition.case_id, partition.variant_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|state| state.parse()).transpose()
    }
}

impl From<&FieldValue> for Value {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Text(text) => Self::Text(text.clone()),
            FieldValue::Int(int) => Self::Integer(*int),
        }
    }
}

/// Set membership binds the whole set as one JSON array, so `IN` terms are
/// not bounded by SQLite's parameter limit.
fn where_clause(filter: &Filter) -> Result<(String, Vec<Value>), StoreError> {
    let mut parts = Vec::with_capacity(filter.terms().len());
    let mut values = Vec::new();
    for term in filter.terms() {
        match term {
            Term::Eq(field, value) => {
                parts.push(format!("{} = ?", field.column()));
                values.push(Value::from(value));
            }
            Term::In(_, set) if set.is_empty() => parts.push("0".to_string()),
            Term::In(field, set) => {
                parts.push(format!(
                    "{} IN (SELECT value FROM json_each(?))",
                    field.column()
                ));
                values.push(Value::Text(serde_json::to_string(set)?));
            }
        }
    }
    if parts.is_empty() {
        Ok(("1".to_string(), values))
    } else {
        Ok((parts.join(" AND "), values))
    }
}

fn row_to_variant(row: &rusqlite::Row<'_>) -> Result<Variant, StoreError> {
    let payload: VariantPayload = serde_json::from_str(&row.get::<_, String>(10)?)?;
    Ok(Variant {
        document_id: row.get(0)?,
        case_id: row.get(1)?,
        institute: row.get(2)?,
        variant_type: row.get::<_, String>(3)?.parse()?,
        display_name: row.get(4)?,
        chromosome: row.get(5)?,
        position: row.get(6)?,
        reference: row.get(7)?,
        alternative: row.get(8)?,
        variant_rank: row.get(9)?,
        genes: payload.genes,
    })
}

struct RawCase {
    case_id: String,
    display_name: String,
    owner: String,
    institute: String,
    causatives: String,
}

impl RawCase {
    fn into_case(self) -> Result<Case, StoreError> {
        Ok(Case {
            case_id: self.case_id,
            display_name: self.display_name,
            owner: self.owner,
            institute: self.institute,
            causatives: serde_json::from_str(&self.causatives)?,
        })
    }
}

fn raw_case(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCase> {
    Ok(RawCase {
        case_id: row.get(0)?,
        display_name: row.get(1)?,
        owner: row.get(2)?,
        institute: row.get(3)?,
        causatives: row.get(4)?,
    })
}

fn lease_holder(conn: &Connection, partition: &Partition) -> Result<Option<String>, StoreError> {
    let holder = conn
        .query_row(
            "SELECT lease_holder FROM rank_partitions WHERE case_id = ?1 AND variant_type = ?2",
            params![partition.case_id, partition.variant_type.as_str()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(holder.flatten())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Transcript, VariantType};
    use crate::store::filter::Field;

    fn variant(case_id: &str, variant_type: VariantType, position: u32) -> Variant {
        Variant::new(case_id, "cust000", variant_type, "1", position, "A", "T")
    }

    #[test]
    fn upsert_replaces_all_fields_and_keeps_insertion_slot() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        let first = variant("case-1", VariantType::Clinical, 10);
        let second = variant("case-1", VariantType::Clinical, 20);
        store.upsert(&first).expect("insert first");
        store.upsert(&second).expect("insert second");

        let mut updated = first.clone();
        updated.variant_rank = Some(7);
        updated.genes = vec![Gene {
            hgnc_id: 1100,
            transcripts: vec![Transcript {
                transcript_id: "ENST00000357654".to_string(),
                is_canonical: true,
                ..Transcript::default()
            }],
            ..Gene::default()
        }];
        store.upsert(&updated).expect("replace first");

        let all = store
            .find(&Filter::new(), &FindOptions { sort: SortKey::Insertion, ..FindOptions::default() })
            .expect("find all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], updated);
        assert_eq!(all[1], second);
    }

    #[test]
    fn rank_sort_puts_unranked_first_then_insertion_order() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        let mut ranked = variant("case-1", VariantType::Clinical, 1);
        ranked.variant_rank = Some(1);
        store.upsert(&ranked).expect("ranked");
        store.upsert(&variant("case-1", VariantType::Clinical, 2)).expect("unranked a");
        store.upsert(&variant("case-1", VariantType::Clinical, 3)).expect("unranked b");

        let positions = store
            .find(&Filter::new(), &FindOptions::by_rank())
            .expect("find")
            .into_iter()
            .map(|v| v.position)
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![2, 3, 1]);
    }

    #[test]
    fn filter_terms_translate_to_equality_and_membership() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        for pos in 1..=4 {
            store.upsert(&variant("case-1", VariantType::Clinical, pos)).expect("clinical");
            store.upsert(&variant("case-1", VariantType::Research, pos)).expect("research");
        }
        store.upsert(&variant("case-2", VariantType::Clinical, 1)).expect("other case");

        let filter = Filter::new()
            .eq(Field::CaseId, "case-1")
            .any_of(Field::DisplayName, ["1_2_A_T_clinical", "1_3_A_T_research", "1_9_A_T_clinical"]);
        let found = store.find(&filter, &FindOptions::by_rank()).expect("find");
        let names = found.iter().map(|v| v.display_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["1_2_A_T_clinical", "1_3_A_T_research"]);

        let nothing = Filter::new().any_of(Field::DocumentId, Vec::<String>::new());
        assert_eq!(store.count(&nothing).expect("count empty set"), 0);
        assert_eq!(store.count(&Filter::new()).expect("count all"), 9);
    }

    #[test]
    fn membership_sets_beyond_the_parameter_limit() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        let wanted = variant("case-1", VariantType::Clinical, 7);
        store.upsert(&wanted).expect("insert");
        store.upsert(&variant("case-1", VariantType::Clinical, 8)).expect("insert other");

        let ids = (0..40_000)
            .map(|n| format!("absent-{n}"))
            .chain([wanted.document_id.clone()])
            .collect::<Vec<_>>();
        let found = store
            .find(&Filter::new().any_of(Field::DocumentId, &ids), &FindOptions::by_rank())
            .expect("find large set");
        assert_eq!(found, vec![wanted.clone()]);

        store.set_rank(&wanted.document_id, 3).expect("rank");
        let ranks = Filter::new().any_of(Field::VariantRank, [0_i64, 3]);
        assert_eq!(store.count(&ranks).expect("count by rank"), 1);
    }

    #[test]
    fn find_applies_skip_and_limit_after_sorting() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        for pos in 1..=5 {
            store.upsert(&variant("case-1", VariantType::Clinical, pos)).expect("insert");
        }
        let page = store
            .find(&Filter::new(), &FindOptions::by_rank().skip(1).limit(2))
            .expect("page");
        assert_eq!(page.iter().map(|v| v.position).collect::<Vec<_>>(), vec![2, 3]);

        let tail = store
            .find(&Filter::new(), &FindOptions::by_rank().skip(3))
            .expect("tail");
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn set_rank_reports_missing_documents() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        let v = variant("case-1", VariantType::Clinical, 1);
        store.upsert(&v).expect("insert");
        assert!(store.set_rank(&v.document_id, 3).expect("rank"));
        assert!(!store.set_rank("missing", 3).expect("rank missing"));

        let stored = store
            .find_one(&Filter::new().eq(Field::DocumentId, v.document_id.as_str()))
            .expect("find one")
            .expect("present");
        assert_eq!(stored.variant_rank, Some(3));
    }

    #[test]
    fn cases_for_filters_by_owner_and_causatives() {
        let store = SqliteStore::open_in_memory().expect("in-memory sqlite");
        store
            .upsert_case(&Case::new("case-b", "cust000").with_causatives(["v1"]))
            .expect("case b");
        store.upsert_case(&Case::new("case-a", "cust000")).expect("case a");
        store
            .upsert_case(&Case::new("case-c", "cust001").with_causatives(["v2"]))
            .expect("case c");

        let with = store.cases_for("cust000", true).expect("with causatives");
        assert_eq!(with.len(), 1);
        assert_eq!(with[0].causatives, vec!["v1".to_string()]);

        let all = store.cases_for("cust000", false).expect("all owned");
        let ids = all.iter().map(|c| c.case_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["case-a", "case-b"]);

        assert_eq!(store.case("case-c").expect("lookup").map(|c| c.owner), Some("cust001".to_string()));
        assert_eq!(store.case("missing").expect("lookup missing"), None);
    }

    #[test]
    fn reopening_a_file_store_keeps_data_and_schema_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("variants.sqlite");
        let v = variant("case-1", VariantType::Research, 42);
        {
            let store = SqliteStore::open(&path).expect("open");
            store.upsert(&v).expect("insert");
        }

        let store = SqliteStore::open(&path).expect("reopen");
        let version: i64 = store
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("user_version");
        assert_eq!(version, SCHEMA_VERSION);
        assert_eq!(store.count(&Filter::new()).expect("count"), 1);
    }

    #[test]
    fn refuses_unknown_schema_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("future.sqlite");
        {
            let conn = Connection::open(&path).expect("raw open");
            conn.execute_batch("PRAGMA user_version = 99;").expect("bump version");
        }
        let err = SqliteStore::open(&path).err().expect("future schema rejected");
        assert!(matches!(err, StoreError::InvalidState(_)));
    }
}
