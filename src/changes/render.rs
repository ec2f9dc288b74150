//! Chat-ready text for a [`ChangeSet`].

use crate::changes::diff::{ChangeSet, EntityChange, SlotDiff};
use crate::changes::normalize::{NormalizedRecord, TrackedField};
use serde_json::Value;

/// Default character cap, leaving headroom under Discord's 2000 limit.
pub const DEFAULT_MAX_CHARS: usize = 1990;

/// Appended when the rendered text had to be cut.
pub const TRUNCATION_SUFFIX: &str = "\n… (truncated)";

/// Marker placed in front of date-typed field diffs.
const DATE_MARKER: &str = "🗓️";

/// Presentation settings for change notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Mention prepended to the header line (e.g. `@everyone`). Empty for none.
    pub mention: String,
    /// Label naming the monitored entity, shown in the header.
    pub target_label: String,
    /// Hard cap on the rendered length, in characters.
    pub max_chars: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mention: "@everyone".to_owned(),
            target_label: String::new(),
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

fn backticked_ids(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("`{id}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn plain(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn entry_json(record: Option<&NormalizedRecord>) -> String {
    record
        .and_then(|r| serde_json::to_string(r).ok())
        .unwrap_or_else(|| "null".to_owned())
}

fn render_entity(entity: &EntityChange, lines: &mut Vec<String>) {
    lines.push(format!("- quiz `{}`", entity.id));
    for positional in &entity.diffs {
        let parts: Vec<String> = match &positional.diff {
            SlotDiff::Entry { before, after } => vec![format!(
                "entry #{}: {} → {}",
                positional.index,
                entry_json(before.as_ref()),
                entry_json(after.as_ref())
            )],
            SlotDiff::Fields(fields) => fields
                .iter()
                .map(|(field, change)| render_field(*field, &change.before, &change.after))
                .collect(),
        };
        lines.push(format!("   • {}", parts.join("; ")));
    }
}

fn render_field(field: TrackedField, before: &Value, after: &Value) -> String {
    if field.is_date() {
        format!(
            "{DATE_MARKER} {field}: `{}` → `{}`",
            plain(before),
            plain(after)
        )
    } else {
        format!("{field}: `{}` → `{}`", plain(before), plain(after))
    }
}

/// Cut `text` to at most `max_chars` characters, ending with
/// [`TRUNCATION_SUFFIX`] when anything was removed.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let suffix_len = TRUNCATION_SUFFIX.chars().count();
    if max_chars <= suffix_len {
        return TRUNCATION_SUFFIX.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - suffix_len).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Render a change notice. Returns an empty string for an empty change set,
/// meaning nothing should be sent.
pub fn render(changes: &ChangeSet, options: &RenderOptions) -> String {
    if changes.is_empty() {
        return String::new();
    }

    let mut lines = Vec::new();

    let mut header = String::new();
    if !options.mention.is_empty() {
        header.push_str(&options.mention);
        header.push(' ');
    }
    header.push_str("📣 Canvas changes detected");
    if !options.target_label.is_empty() {
        header.push_str(&format!(" for course `{}`", options.target_label));
    }
    header.push_str(" (quiz_assignment_overrides)");
    lines.push(header);

    if !changes.added.is_empty() {
        lines.push(format!(
            "**➕ Quizzes added (new overrides):** {}",
            backticked_ids(&changes.added)
        ));
    }
    if !changes.removed.is_empty() {
        lines.push(format!(
            "**➖ Quizzes removed (overrides gone):** {}",
            backticked_ids(&changes.removed)
        ));
    }
    if !changes.changed.is_empty() {
        lines.push("**✏️ Overrides changed:**".to_owned());
        for entity in &changes.changed {
            render_entity(entity, &mut lines);
        }
    }

    truncate(&lines.join("\n"), options.max_chars)
}
