use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::MptError;
use crate::MptResult;

/// Smallest universe the engine accepts.
pub const MIN_ASSETS: usize = 3;
/// Largest universe the engine accepts.
pub const MAX_ASSETS: usize = 10;

/// Ordered, immutable list of asset identifiers. Every vector and matrix in the
/// engine is indexed positionally against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AssetUniverse {
    names: Vec<String>,
}

impl AssetUniverse {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> MptResult<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        if names.len() < MIN_ASSETS || names.len() > MAX_ASSETS {
            return Err(MptError::InvalidInput {
                field: "assets".into(),
                reason: format!(
                    "Universe must hold between {MIN_ASSETS} and {MAX_ASSETS} assets, got {}",
                    names.len()
                ),
            });
        }

        let mut seen = HashSet::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(MptError::InvalidInput {
                    field: format!("assets[{i}]"),
                    reason: "Asset identifier must not be empty".into(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(MptError::InvalidInput {
                    field: format!("assets[{i}]"),
                    reason: format!("Duplicate asset identifier '{name}'"),
                });
            }
        }

        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl TryFrom<Vec<String>> for AssetUniverse {
    type Error = MptError;

    fn try_from(names: Vec<String>) -> MptResult<Self> {
        AssetUniverse::new(names)
    }
}

impl From<AssetUniverse> for Vec<String> {
    fn from(u: AssetUniverse) -> Self {
        u.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_universe() {
        let u = AssetUniverse::new(["SPY", "AGG", "GLD"]).unwrap();
        assert_eq!(u.len(), 3);
        assert_eq!(u.index_of("AGG"), Some(1));
        assert_eq!(u.name(2), Some("GLD"));
    }

    #[test]
    fn test_too_small_or_large() {
        assert!(AssetUniverse::new(["A", "B"]).is_err());
        let eleven: Vec<String> = (0..11).map(|i| format!("A{i}")).collect();
        assert!(AssetUniverse::new(eleven).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = AssetUniverse::new(["A", "B", "A"]).unwrap_err();
        match err {
            MptError::InvalidInput { field, .. } => assert_eq!(field, "assets[2]"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<AssetUniverse, _> = serde_json::from_str(r#"["A","B","C"]"#);
        assert!(ok.is_ok());
        let bad: Result<AssetUniverse, _> = serde_json::from_str(r#"["A",""," C"]"#);
        assert!(bad.is_err());
    }
}
