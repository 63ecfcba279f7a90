use crate::labels::{Labels, LABEL_PURPOSE};
use crate::locator::Locator;

use serde::{Deserialize, Serialize};

/// Package metadata stored next to the content. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub locator: Locator,
    pub size_bytes: u64,
    /// Hex sha256 of the content.
    pub digest: String,
    #[serde(default)]
    pub labels: Labels,
    /// Unpack the content on install instead of placing it as a file.
    #[serde(default)]
    pub archive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Vec<u8>>,
}

impl Envelope {
    #[inline]
    pub fn purpose(&self) -> Option<&str> {
        self.labels.get(LABEL_PURPOSE).map(String::as_str)
    }

    #[inline]
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).map(String::as_str) == Some(value)
    }

    /// True when every label in `wanted` is present with the same value.
    pub fn matches_labels(&self, wanted: &Labels) -> bool {
        wanted.iter().all(|(k, v)| self.has_label(k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::purpose_labels;

    fn envelope_with(labels: Labels) -> Envelope {
        Envelope {
            locator: Locator::new("c", "planet-ca", "0.0.1").unwrap(),
            size_bytes: 4,
            digest: "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
                .to_string(),
            labels,
            archive: false,
            manifest: None,
        }
    }

    #[test]
    fn test_matches_labels_is_subset_match() {
        let mut labels = purpose_labels("ca");
        labels.insert("advertise-ip".to_string(), "10.0.0.1".to_string());
        let envelope = envelope_with(labels);

        assert!(envelope.matches_labels(&purpose_labels("ca")));
        assert!(envelope.matches_labels(&Labels::new()));
        assert!(!envelope.matches_labels(&purpose_labels("planet-config")));
    }

    #[test]
    fn test_purpose_accessor() {
        let envelope = envelope_with(purpose_labels("ca"));
        assert_eq!(envelope.purpose(), Some("ca"));
        assert!(envelope_with(Labels::new()).purpose().is_none());
    }
}
