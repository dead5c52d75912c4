pub mod gene;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

pub use gene::{Gene, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
    Clinical,
    Research,
}

impl VariantType {
    pub const ALL: [Self; 2] = [Self::Clinical, Self::Research];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clinical => "clinical",
            Self::Research => "research",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "clinical" => Ok(Self::Clinical),
            "research" => Ok(Self::Research),
            _ => Err(StoreError::InvalidState(format!(
                "unknown variant type `{raw}`"
            ))),
        }
    }
}

/// The unit of ranking: every variant of one case and one analysis type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub case_id: String,
    pub variant_type: VariantType,
}

impl Partition {
    pub fn new(case_id: impl Into<String>, variant_type: VariantType) -> Self {
        Self {
            case_id: case_id.into(),
            variant_type,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.case_id, self.variant_type)
    }
}

/// A called variant belonging to one case and one analysis type.
///
/// `document_id` is a content fingerprint and never changes once created.
/// `variant_rank` stays `None` until the partition has been ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub document_id: String,
    pub case_id: String,
    pub institute: String,
    pub variant_type: VariantType,
    pub display_name: String,
    pub chromosome: String,
    pub position: u32,
    pub reference: String,
    pub alternative: String,
    #[serde(default)]
    pub variant_rank: Option<u32>,
    #[serde(default)]
    pub genes: Vec<Gene>,
}

impl Variant {
    pub fn new(
        case_id: impl Into<String>,
        institute: impl Into<String>,
        variant_type: VariantType,
        chromosome: impl Into<String>,
        position: u32,
        reference: impl Into<String>,
        alternative: impl Into<String>,
    ) -> Self {
        let case_id = case_id.into();
        let chromosome = chromosome.into();
        let reference = reference.into();
        let alternative = alternative.into();
        let display_name = format!(
            "{chromosome}_{position}_{reference}_{alternative}_{variant_type}"
        );
        let document_id = fingerprint(&[
            &case_id,
            &chromosome,
            &position.to_string(),
            &reference,
            &alternative,
            variant_type.as_str(),
        ]);
        Self {
            document_id,
            case_id,
            institute: institute.into(),
            variant_type,
            display_name,
            chromosome,
            position,
            reference,
            alternative,
            variant_rank: None,
            genes: Vec::new(),
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::new(self.case_id.clone(), self.variant_type)
    }

    /// Display name without its analysis-type suffix.
    pub fn normalized_id(&self) -> &str {
        normalized_id(&self.display_name)
    }
}

/// A patient case as seen by the correlator.
///
/// `causatives` holds the `document_id`s of variants a reviewer confirmed as
/// causative. This crate only reads that list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub display_name: String,
    pub owner: String,
    pub institute: String,
    #[serde(default)]
    pub causatives: Vec<String>,
}

impl Case {
    pub fn new(case_id: impl Into<String>, owner: impl Into<String>) -> Self {
        let case_id = case_id.into();
        let owner = owner.into();
        Self {
            display_name: case_id.clone(),
            case_id,
            institute: owner.clone(),
            owner,
            causatives: Vec::new(),
        }
    }

    pub fn with_causatives<I, T>(mut self, causatives: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.causatives = causatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_causatives(&self) -> bool {
        !self.causatives.is_empty()
    }
}

/// Strips the final `_`-delimited segment, e.g. `1_1000_A_T_clinical` → `1_1000_A_T`.
///
/// A name without any `_` is returned unchanged.
pub fn normalized_id(display_name: &str) -> &str {
    display_name
        .rsplit_once('_')
        .map_or(display_name, |(head, _)| head)
}

/// Both typed display names a normalized id can appear under.
pub fn typed_display_names(normalized: &str) -> [String; 2] {
    VariantType::ALL.map(|variant_type| format!("{normalized}_{variant_type}"))
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
