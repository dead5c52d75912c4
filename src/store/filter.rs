use serde::Serialize;

use crate::model::{Partition, VariantType};

/// Variant fields a predicate may constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    DocumentId,
    CaseId,
    VariantType,
    VariantRank,
    DisplayName,
}

impl Field {
    pub const fn column(self) -> &'static str {
        match self {
            Self::DocumentId => "document_id",
            Self::CaseId => "case_id",
            Self::VariantType => "variant_type",
            Self::VariantRank => "variant_rank",
            Self::DisplayName => "display_name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Int(i64),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<VariantType> for FieldValue {
    fn from(value: VariantType) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Eq(Field, FieldValue),
    /// Set membership. An empty set matches nothing.
    In(Field, Vec<FieldValue>),
}

/// A conjunction of terms. The empty filter matches every variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition(partition: &Partition) -> Self {
        Self::new()
            .eq(Field::CaseId, partition.case_id.as_str())
            .eq(Field::VariantType, partition.variant_type)
    }

    #[must_use]
    pub fn eq(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.terms.push(Term::Eq(field, value.into()));
        self
    }

    #[must_use]
    pub fn any_of<I, V>(mut self, field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        self.terms
            .push(Term::In(field, values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Ascending rank; unset ranks first, ties broken by insertion order.
    #[default]
    Rank,
    Insertion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FindOptions {
    pub sort: SortKey,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn by_rank() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
