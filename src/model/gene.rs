use serde::{Deserialize, Serialize};

/// Per-gene annotation carried on a variant. Opaque to ranking and correlation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Gene {
    pub hgnc_id: u32,
    #[serde(default)]
    pub transcripts: Vec<Transcript>,
    // worst functional impact over all transcripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sift_prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polyphen_prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omim_gene_entry: Option<u32>,
}

impl Gene {
    pub fn omim_link(&self) -> Option<String> {
        self.omim_gene_entry
            .map(|entry| format!("http://omim.org/entry/{entry}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub transcript_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_id: Option<String>,
    #[serde(default)]
    pub functional_annotations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sift_prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polyphen_prediction: Option<String>,
    #[serde(default)]
    pub is_canonical: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omim_link_requires_entry() {
        let mut gene = Gene {
            hgnc_id: 1100,
            ..Gene::default()
        };
        assert_eq!(gene.omim_link(), None);
        gene.omim_gene_entry = Some(113705);
        assert_eq!(
            gene.omim_link().as_deref(),
            Some("http://omim.org/entry/113705")
        );
    }

    #[test]
    fn sparse_payload_deserializes_with_defaults() {
        let gene: Gene = serde_json::from_str(r#"{"hgnc_id": 1100}"#).expect("gene json");
        assert!(gene.transcripts.is_empty());
        assert_eq!(gene.sift_prediction, None);

        let encoded = serde_json::to_string(&gene).expect("encode");
        assert_eq!(encoded, r#"{"hgnc_id":1100,"transcripts":[]}"#);
    }
}
