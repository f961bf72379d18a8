//! Prompt construction for one work item.

use std::path::Path;

use kanjigen_shared::{DefaultsConfig, KanjigenError, Result, WorkItem};

/// Placeholder replaced by the item id.
pub const ID_PLACEHOLDER: &str = "{kanji}";
/// Placeholder replaced by the item group.
pub const GROUP_PLACEHOLDER: &str = "{group}";

const BUILTIN_TEMPLATE: &str = r#"You are writing a study entry for the Japanese kanji 「{kanji}」 (school grade {group}).

Reply with ONE JSON object and nothing else. No Markdown fences, no commentary.
Use exactly these keys:

{
  "kanji": "{kanji}",
  "grade": {group},
  "readings": [
    {
      "kana": "reading in kana",
      "romaji": "romanised reading",
      "type": "on'yomi or kun'yomi",
      "origin": "where this reading comes from",
      "usage": "when this reading is used",
      "anchor": {"word": "core word", "reading": "its reading", "meaning": "its meaning", "hint": "memory hint"},
      "examples": [
        {"word": "example word", "reading": "its reading", "meaning": "its meaning", "link": "how it connects to the anchor"}
      ]
    }
  ],
  "summary": "core meaning in one or two sentences",
  "etymology": {"type": "pictograph, ideograph, compound ideograph or phono-semantic", "explanation": "how the character was formed"},
  "components": [
    {"part": "component", "meaning": "what it depicts", "extension": "how that meaning extends"}
  ],
  "composition": "how the components combine into the meaning",
  "culture": "cultural background and notable usage",
  "memory_chain": "one line that ties shape, meaning and readings together"
}

Every reading of 「{kanji}」 in common use must appear in "readings".
All string values must be valid JSON strings: escape newlines as \n.
"#;

/// A prompt template with `{kanji}` and `{group}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptTemplate {
    /// The template compiled into the binary.
    pub fn builtin() -> Self {
        Self {
            template: BUILTIN_TEMPLATE.to_string(),
        }
    }

    /// A custom template. It must mention `{kanji}` somewhere.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(ID_PLACEHOLDER) {
            return Err(KanjigenError::config(format!(
                "prompt template has no {ID_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { template })
    }

    /// Load a template file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| KanjigenError::io(path, e))?;
        Self::new(text)
    }

    /// `defaults.prompt_template` if set, else the built-in template.
    pub fn from_config(defaults: &DefaultsConfig) -> Result<Self> {
        match &defaults.prompt_template {
            Some(path) => Self::from_path(Path::new(path)),
            None => Ok(Self::builtin()),
        }
    }

    /// Prompt for `item`.
    pub fn render(&self, item: &WorkItem) -> String {
        self.template
            .replace(ID_PLACEHOLDER, &item.id)
            .replace(GROUP_PLACEHOLDER, &item.group.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanjigen_shared::ItemState;

    fn item(id: &str, group: u32) -> WorkItem {
        WorkItem {
            id: id.into(),
            group,
            state: ItemState::Pending,
        }
    }

    #[test]
    fn builtin_mentions_item_and_group() {
        let prompt = PromptTemplate::builtin().render(&item("森", 1));
        assert!(prompt.contains("「森」"));
        assert!(prompt.contains("\"grade\": 1"));
        assert!(!prompt.contains(ID_PLACEHOLDER));
        assert!(!prompt.contains(GROUP_PLACEHOLDER));
    }

    #[test]
    fn custom_template_requires_placeholder() {
        assert!(PromptTemplate::new("explain this").is_err());
        let t = PromptTemplate::new("explain {kanji} ({group})").unwrap();
        assert_eq!(t.render(&item("林", 1)), "explain 林 (1)");
    }

    #[test]
    fn missing_template_file_is_io_error() {
        let defaults = DefaultsConfig {
            prompt_template: Some("/definitely/not/here/prompt.md".into()),
            ..DefaultsConfig::default()
        };
        let err = PromptTemplate::from_config(&defaults).unwrap_err();
        assert!(matches!(err, KanjigenError::Io { .. }));
    }
}
