//! Markdown rendering of completed kanji entries.
//!
//! The job store keeps payloads as untyped JSON objects. This crate is the
//! downstream consumer that knows their shape: [`validate_record`] checks a
//! payload against [`KanjiEntry`], and [`render`] turns it into a Markdown
//! study page.

use kanjigen_shared::{KanjigenError, Record, Result};
use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Entry shape
// ---------------------------------------------------------------------------

/// A generated dictionary entry. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KanjiEntry {
    pub readings: Vec<Reading>,
    pub summary: String,
    pub etymology: Etymology,
    pub components: Vec<Component>,
    pub composition: String,
    pub culture: String,
    pub memory_chain: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reading {
    pub kana: String,
    pub romaji: String,
    /// On'yomi or kun'yomi.
    #[serde(rename = "type")]
    pub kind: String,
    pub origin: String,
    pub usage: String,
    pub anchor: Anchor,
    pub examples: Vec<Example>,
}

/// The one word a reading is memorised through.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Anchor {
    pub word: String,
    pub reading: String,
    pub meaning: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Example {
    pub word: String,
    pub reading: String,
    pub meaning: String,
    /// How the example connects back to the anchor word.
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Etymology {
    #[serde(rename = "type")]
    pub kind: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Component {
    pub part: String,
    pub meaning: String,
    pub extension: String,
}

impl KanjiEntry {
    /// Interpret a stored payload.
    pub fn from_record(record: &Record) -> Result<Self> {
        serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| KanjigenError::validation(format!("record shape: {e}")))
    }
}

/// Check that `record` has every key the renderer needs, with the right types.
pub fn validate_record(record: &Record) -> Result<()> {
    KanjiEntry::from_record(record).map(|_| ())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render one completed entry as a Markdown document.
pub fn render(id: &str, record: &Record) -> Result<String> {
    let entry = KanjiEntry::from_record(record)?;
    Ok(render_entry(id, &entry))
}

/// Render an already validated entry.
pub fn render_entry(id: &str, entry: &KanjiEntry) -> String {
    let mut lines: Vec<String> = vec![format!("# {id}"), String::new()];

    lines.push("## Readings".into());
    lines.push(String::new());
    lines.push("| Kana | Romaji | Type |".into());
    lines.push("|------|--------|------|".into());
    for r in &entry.readings {
        lines.push(format!("| {} | {} | {} |", cell(&r.kana), cell(&r.romaji), cell(&r.kind)));
    }
    lines.push(String::new());

    lines.push("## Meaning".into());
    lines.push(String::new());
    lines.push(entry.summary.clone());
    lines.push(String::new());

    lines.push("## Reading details".into());
    lines.push(String::new());
    for (i, r) in entry.readings.iter().enumerate() {
        lines.push(format!("### {}. {} ({})", i + 1, r.kana, r.romaji));
        lines.push(String::new());
        lines.push(format!("**Type**: {}", r.kind));
        lines.push(String::new());
        lines.push(format!("**Origin**: {}", r.origin));
        lines.push(String::new());
        lines.push(format!("**Usage**: {}", r.usage));
        lines.push(String::new());

        let a = &r.anchor;
        lines.push(format!(
            "**Anchor word**: 「{}（{}）」 = {}. {}",
            a.word, a.reading, a.meaning, a.hint
        ));
        lines.push(String::new());

        lines.push("| Word | Reading | Meaning | Link |".into());
        lines.push("|------|---------|---------|------|".into());
        lines.push(format!(
            "| {} | {} | {} | anchor |",
            cell(&a.word),
            cell(&a.reading),
            cell(&a.meaning)
        ));
        for ex in &r.examples {
            lines.push(format!(
                "| {} | {} | {} | {} |",
                cell(&ex.word),
                cell(&ex.reading),
                cell(&ex.meaning),
                cell(&ex.link)
            ));
        }
        lines.push(String::new());
    }

    lines.push("## Etymology".into());
    lines.push(String::new());
    lines.push(format!("「{id}」 is a {}. {}", entry.etymology.kind, entry.etymology.explanation));
    lines.push(String::new());

    lines.push("## Components".into());
    lines.push(String::new());
    for c in &entry.components {
        lines.push(format!("**{}**: {} → {}", c.part, c.meaning, c.extension));
        lines.push(String::new());
    }

    let parts: Vec<&str> = entry.components.iter().map(|c| c.part.as_str()).collect();
    lines.push("## Composition".into());
    lines.push(String::new());
    lines.push("```".into());
    lines.push(parts.join(" + "));
    lines.push("    ↓".into());
    lines.push(entry.composition.clone());
    lines.push("```".into());
    lines.push(String::new());

    lines.push("## Culture".into());
    lines.push(String::new());
    lines.push(entry.culture.clone());
    lines.push(String::new());

    lines.push("## Memory chain".into());
    lines.push(String::new());
    lines.push(format!("> {}", entry.memory_chain));
    lines.push(String::new());

    lines.join("\n")
}

/// Keep table cells on one row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
