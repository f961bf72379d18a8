//! The identity → group enumeration a fresh store is built from.

use std::collections::BTreeMap;
use std::path::Path;

use kanjigen_shared::{KanjigenError, Result};
use serde_json::Value;

/// Every work item id with its group, in a deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Seed {
    entries: BTreeMap<String, u32>,
}

impl Seed {
    /// Read a seed document from disk.
    ///
    /// Two shapes are accepted:
    /// - by-grade: `{"by_grade": {"1": ["一", ...], ...}, ...}`
    /// - legacy store: `{"kanji": {"一": {"grade": 1, ...}, ...}, ...}`
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| KanjigenError::io(path, e))?;
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| KanjigenError::seed(path, format!("not valid JSON: {e}")))?;
        Self::from_value(&doc).map_err(|msg| KanjigenError::seed(path, msg))
    }

    /// Interpret an already-parsed seed document.
    pub fn from_value(doc: &Value) -> std::result::Result<Self, String> {
        let seed = if let Some(by_grade) = doc.get("by_grade") {
            Self::from_by_grade(by_grade)?
        } else if let Some(kanji) = doc.get("kanji") {
            Self::from_legacy(kanji)?
        } else {
            return Err("expected a `by_grade` or `kanji` object".into());
        };

        if seed.is_empty() {
            return Err("seed contains no items".into());
        }
        Ok(seed)
    }

    /// Build a seed from `(id, group)` pairs. Later duplicates are rejected.
    pub fn from_pairs<I, S>(pairs: I) -> std::result::Result<Self, String>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut seed = Self::default();
        for (id, group) in pairs {
            seed.insert(id.into(), group)?;
        }
        Ok(seed)
    }

    fn from_by_grade(by_grade: &Value) -> std::result::Result<Self, String> {
        let grades = by_grade
            .as_object()
            .ok_or("`by_grade` must be an object")?;

        let mut seed = Self::default();
        for (grade, ids) in grades {
            let group: u32 = grade
                .trim()
                .parse()
                .map_err(|_| format!("grade key `{grade}` is not a number"))?;
            let ids = ids
                .as_array()
                .ok_or_else(|| format!("grade {grade} must map to an array"))?;
            for id in ids {
                let id = id
                    .as_str()
                    .ok_or_else(|| format!("grade {grade} contains a non-string id"))?;
                seed.insert(id.to_string(), group)?;
            }
        }
        Ok(seed)
    }

    fn from_legacy(kanji: &Value) -> std::result::Result<Self, String> {
        let entries = kanji.as_object().ok_or("`kanji` must be an object")?;

        let mut seed = Self::default();
        for (id, entry) in entries {
            let group = entry
                .get("grade")
                .and_then(Value::as_u64)
                .and_then(|g| u32::try_from(g).ok())
                .ok_or_else(|| format!("entry `{id}` has no numeric `grade`"))?;
            seed.insert(id.clone(), group)?;
        }
        Ok(seed)
    }

    fn insert(&mut self, id: String, group: u32) -> std::result::Result<(), String> {
        if id.is_empty() {
            return Err("empty id".into());
        }
        if self.entries.insert(id.clone(), group).is_some() {
            return Err(format!("duplicate id `{id}`"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(id, group)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(id, group)| (id.as_str(), *group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn by_grade_document() {
        let doc = json!({
            "total": 3,
            "per_grade": {"1": 2, "2": 1},
            "by_grade": {"1": ["一", "右"], "2": ["引"]}
        });
        let seed = Seed::from_value(&doc).unwrap();
        assert_eq!(seed.len(), 3);
        let pairs: Vec<_> = seed.iter().collect();
        assert!(pairs.contains(&("引", 2)));
        assert!(pairs.contains(&("一", 1)));
    }

    #[test]
    fn legacy_store_document() {
        let doc = json!({
            "meta": {"total": 2},
            "kanji": {
                "山": {"grade": 1, "status": "completed", "data": {}},
                "海": {"grade": 2, "status": "pending"}
            }
        });
        let seed = Seed::from_value(&doc).unwrap();
        let pairs: Vec<_> = seed.iter().collect();
        assert_eq!(pairs, vec![("山", 1), ("海", 2)]);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(Seed::from_value(&json!({"items": {}})).is_err());
        assert!(Seed::from_value(&json!({"by_grade": {"one": ["一"]}})).is_err());
        assert!(Seed::from_value(&json!({"by_grade": {"1": "一"}})).is_err());
        assert!(Seed::from_value(&json!({"by_grade": {}})).is_err());
        assert!(Seed::from_value(&json!({"kanji": {"山": {"status": "pending"}}})).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doc = json!({"by_grade": {"1": ["一"], "2": ["一"]}});
        let err = Seed::from_value(&doc).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn from_pairs_builds_seed() {
        let seed = Seed::from_pairs([("日", 1), ("月", 1)]).unwrap();
        assert_eq!(seed.len(), 2);
    }
}
