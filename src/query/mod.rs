//! Translation of listing criteria into store predicates.

use crate::model::VariantType;
use crate::store::filter::{Field, Filter};

/// Listing criteria on top of case scoping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantFilter {
    pub variant_type: Option<VariantType>,
    pub display_names: Option<Vec<String>>,
}

impl VariantFilter {
    pub fn of_type(variant_type: VariantType) -> Self {
        Self {
            variant_type: Some(variant_type),
            ..Self::default()
        }
    }
}

/// Builds the predicate for a variant listing. Opaque to the handler.
pub trait QueryBuilder {
    fn build_query(
        &self,
        case_id: &str,
        filter: Option<&VariantFilter>,
        explicit_ids: Option<&[String]>,
    ) -> Filter;
}

/// Scopes every query to one case, then narrows by the criteria given.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseScopedQueryBuilder;

impl QueryBuilder for CaseScopedQueryBuilder {
    fn build_query(
        &self,
        case_id: &str,
        filter: Option<&VariantFilter>,
        explicit_ids: Option<&[String]>,
    ) -> Filter {
        let mut query = Filter::new().eq(Field::CaseId, case_id);
        if let Some(filter) = filter {
            if let Some(variant_type) = filter.variant_type {
                query = query.eq(Field::VariantType, variant_type);
            }
            if let Some(names) = &filter.display_names {
                query = query.any_of(Field::DisplayName, names);
            }
        }
        if let Some(ids) = explicit_ids.filter(|ids| !ids.is_empty()) {
            query = query.any_of(Field::DocumentId, ids);
        }
        query
    }
}
