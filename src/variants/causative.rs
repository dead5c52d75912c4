use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::model::{Case, Variant, typed_display_names};
use crate::store::filter::{Field, Filter, FindOptions};
use crate::store::{CaseRepository, VariantStore};
use crate::variants::VariantHandler;

/// Causative variants of an institute's cases, resolved one at a time.
///
/// Only the case list is loaded up front; each causative reference is fetched
/// when pulled. References to variants that no longer exist are skipped.
pub struct CausativeStream<'a, S: VariantStore + ?Sized> {
    store: &'a S,
    cases: std::vec::IntoIter<Case>,
    current: Option<(String, std::vec::IntoIter<String>)>,
}

impl<'a, S: VariantStore + ?Sized> CausativeStream<'a, S> {
    pub fn new(store: &'a S, cases: Vec<Case>) -> Self {
        Self {
            store,
            cases: cases.into_iter(),
            current: None,
        }
    }
}

impl<S: VariantStore + ?Sized> Iterator for CausativeStream<'_, S> {
    type Item = Result<Variant, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((case_id, references)) = &mut self.current {
                if let Some(document_id) = references.next() {
                    let filter = Filter::new().eq(Field::DocumentId, document_id.as_str());
                    match self.store.find_one(&filter) {
                        Ok(Some(variant)) => return Some(Ok(variant)),
                        Ok(None) => {
                            tracing::warn!(
                                case_id = %case_id,
                                document_id = %document_id,
                                "causative reference points to a missing variant"
                            );
                            continue;
                        }
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            let case = self.cases.next()?;
            self.current = Some((case.case_id, case.causatives.into_iter()));
        }
    }
}

impl<S: VariantStore + CaseRepository, Q> VariantHandler<S, Q> {
    /// Every causative variant recorded on cases owned by `institute_id`.
    pub fn causatives_for_institute(
        &self,
        institute_id: &str,
    ) -> Result<CausativeStream<'_, S>, StoreError> {
        let cases = self.store.cases_for(institute_id, true)?;
        tracing::debug!(institute_id, cases = cases.len(), "streaming causatives");
        Ok(CausativeStream::new(&self.store, cases))
    }

    /// Variants of `case` that were causative anywhere in its owner's history,
    /// under either analysis type.
    pub fn check_causatives(&self, case: &Case) -> Result<Vec<Variant>, StoreError> {
        let mut display_names = BTreeSet::new();
        for causative in self.causatives_for_institute(&case.owner)? {
            display_names.extend(typed_display_names(causative?.normalized_id()));
        }
        if display_names.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::new()
            .eq(Field::CaseId, case.case_id.as_str())
            .any_of(Field::DisplayName, display_names);
        let found = self.store.find(&filter, &FindOptions::by_rank())?;
        tracing::info!(case_id = %case.case_id, found = found.len(), "checked for known causatives");
        Ok(found)
    }

    /// The same variant marked causative in other cases of its institute.
    ///
    /// Matches causatives whose display name starts with `variant`'s
    /// normalized id.
    pub fn other_causatives<'a>(
        &'a self,
        case: &'a Case,
        variant: &'a Variant,
    ) -> Result<impl Iterator<Item = Result<Variant, StoreError>> + 'a, StoreError> {
        let normalized = variant.normalized_id();
        let causatives = self.causatives_for_institute(&variant.institute)?;
        Ok(causatives.filter(move |causative| match causative {
            Ok(causative) => {
                causative.case_id != case.case_id
                    && causative.display_name.starts_with(normalized)
            }
            Err(_) => true,
        }))
    }
}
