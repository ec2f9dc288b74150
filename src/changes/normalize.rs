//! Normalization of raw override payloads into a [`CanonicalIndex`].
//!
//! Only the five tracked due-date fields survive normalization, and each
//! entity's records are sorted by a deterministic key so that a payload the
//! server merely re-ordered normalizes to the same index.

use crate::error::WatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Top-level key the overrides endpoint wraps its records in.
pub const OVERRIDES_KEY: &str = "quiz_assignment_overrides";

/// Field carrying the entity identifier of one override record.
const ENTITY_ID_KEY: &str = "quiz_id";

/// Field carrying the due-date sub-records of one override record.
const DUE_DATES_KEY: &str = "due_dates";

/// Stand-in used for null/absent values when building sort keys.
const SORT_SENTINEL: &str = "";

/// Raw payload as returned by the endpoint.
///
/// The endpoint answers either with a wrapping object or with a bare list;
/// both shapes are resolved here so the normalizer never branches on shape.
#[derive(Debug, Clone, PartialEq)]
pub enum OverridePayload {
    /// `{"quiz_assignment_overrides": [...]}`.
    Wrapped(Vec<Value>),
    /// `[...]`.
    Bare(Vec<Value>),
}

impl OverridePayload {
    /// Classify a decoded JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::MalformedPayload`] for scalars, or when the
    /// wrapping key holds something other than a list.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        match value {
            Value::Array(items) => Ok(Self::Bare(items)),
            Value::Object(mut map) => match map.remove(OVERRIDES_KEY) {
                None | Some(Value::Null) => Ok(Self::Wrapped(Vec::new())),
                Some(Value::Array(items)) => Ok(Self::Wrapped(items)),
                Some(other) => Err(WatchError::MalformedPayload(format!(
                    "`{OVERRIDES_KEY}` is {}, expected a list",
                    json_kind(&other)
                ))),
            },
            other => Err(WatchError::MalformedPayload(format!(
                "expected an object or a list, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a response body.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::MalformedPayload`] if the bytes are not JSON or
    /// do not have a recognised shape.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| WatchError::MalformedPayload(e.to_string()))?;
        Self::from_value(value)
    }

    /// Override records regardless of the wrapping shape.
    pub fn records(&self) -> &[Value] {
        match self {
            Self::Wrapped(items) | Self::Bare(items) => items,
        }
    }

    /// Append the records of a continuation page.
    pub fn extend(&mut self, other: OverridePayload) {
        let more = match other {
            Self::Wrapped(items) | Self::Bare(items) => items,
        };
        match self {
            Self::Wrapped(items) | Self::Bare(items) => items.extend(more),
        }
    }

    /// Number of raw override records.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// `true` when the payload carries no records.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Due-date fields that participate in change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    DueAt,
    UnlockAt,
    LockAt,
    Title,
    Base,
}

impl TrackedField {
    /// All tracked fields in canonical order.
    pub const ALL: [TrackedField; 5] = [
        TrackedField::DueAt,
        TrackedField::UnlockAt,
        TrackedField::LockAt,
        TrackedField::Title,
        TrackedField::Base,
    ];

    /// JSON key of the field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DueAt => "due_at",
            Self::UnlockAt => "unlock_at",
            Self::LockAt => "lock_at",
            Self::Title => "title",
            Self::Base => "base",
        }
    }

    /// Whether the field holds a timestamp.
    pub fn is_date(self) -> bool {
        matches!(self, Self::DueAt | Self::UnlockAt | Self::LockAt)
    }
}

impl std::fmt::Display for TrackedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One due-date entry reduced to the tracked fields.
///
/// Every value is a JSON scalar or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(default)]
    pub due_at: Value,
    #[serde(default)]
    pub unlock_at: Value,
    #[serde(default)]
    pub lock_at: Value,
    #[serde(default)]
    pub title: Value,
    #[serde(default)]
    pub base: Value,
}

impl NormalizedRecord {
    /// Reduce a raw due-date object to the tracked fields.
    ///
    /// Returns `None` when `raw` is not an object.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let take = |field: TrackedField| obj.get(field.as_str()).map(scalarize).unwrap_or_default();
        Some(Self {
            due_at: take(TrackedField::DueAt),
            unlock_at: take(TrackedField::UnlockAt),
            lock_at: take(TrackedField::LockAt),
            title: take(TrackedField::Title),
            base: take(TrackedField::Base),
        })
    }

    /// Value of one tracked field.
    pub fn get(&self, field: TrackedField) -> &Value {
        match field {
            TrackedField::DueAt => &self.due_at,
            TrackedField::UnlockAt => &self.unlock_at,
            TrackedField::LockAt => &self.lock_at,
            TrackedField::Title => &self.title,
            TrackedField::Base => &self.base,
        }
    }

    fn sort_key(&self) -> (String, u8, String, String, String) {
        (
            sort_text(&self.title),
            u8::from(is_truthy(&self.base)),
            sort_text(&self.due_at),
            sort_text(&self.unlock_at),
            sort_text(&self.lock_at),
        )
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key()).then_with(|| {
            // Records whose sort keys tie (e.g. `base: "yes"` vs `base: true`)
            // still need a total order.
            serde_json::to_string(self)
                .unwrap_or_default()
                .cmp(&serde_json::to_string(other).unwrap_or_default())
        })
    }
}

/// Nested values are flattened to their compact JSON text.
fn scalarize(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}

fn sort_text(value: &Value) -> String {
    match value {
        Value::Null => SORT_SENTINEL.to_owned(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Entity id to its canonically ordered due-date records.
///
/// Keys are the decimal form of the integer id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalIndex(BTreeMap<String, Vec<NormalizedRecord>>);

impl CanonicalIndex {
    /// Empty index, as seen before the first successful cycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of one entity.
    pub fn get(&self, id: &str) -> Option<&[NormalizedRecord]> {
        self.0.get(id).map(Vec::as_slice)
    }

    /// Insert records for an entity, re-sorting them canonically.
    pub fn insert(&mut self, id: impl Into<String>, mut records: Vec<NormalizedRecord>) {
        records.sort_by(NormalizedRecord::canonical_cmp);
        self.0.insert(id.into(), records);
    }

    /// Whether the entity is present.
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Entity ids in key order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no entity is tracked.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decimal string form of an integer-like id, or `None` if the value is
/// missing or not integer-like.
fn entity_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| format!("{f:.0}"))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Some(i.to_string())
            } else {
                trimmed.parse::<u64>().ok().map(|u| u.to_string())
            }
        }
        _ => None,
    }
}

/// Build the canonical index for a payload.
///
/// Records without a usable id are skipped. Records sharing an id have their
/// due dates merged before sorting, so the result does not depend on the
/// order the server listed them in.
pub fn normalize(payload: &OverridePayload) -> CanonicalIndex {
    let mut grouped: BTreeMap<String, Vec<NormalizedRecord>> = BTreeMap::new();

    for item in payload.records() {
        let Some(id) = item.get(ENTITY_ID_KEY).and_then(entity_id) else {
            tracing::trace!("skipping override record without a usable id");
            continue;
        };

        let records = item
            .get(DUE_DATES_KEY)
            .and_then(Value::as_array)
            .map(|due_dates| {
                due_dates
                    .iter()
                    .filter_map(NormalizedRecord::from_raw)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        grouped.entry(id).or_default().extend(records);
    }

    let mut index = CanonicalIndex::new();
    for (id, records) in grouped {
        index.insert(id, records);
    }
    index
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn wrapped(records: Value) -> OverridePayload {
        OverridePayload::from_value(json!({ OVERRIDES_KEY: records })).unwrap()
    }

    #[test]
    fn wrapped_and_bare_payloads_normalize_identically() {
        let records = json!([
            {"quiz_id": 7, "due_dates": [{"title": "A", "due_at": "2024-01-01"}]}
        ]);
        let bare = OverridePayload::from_value(records.clone()).unwrap();
        assert!(matches!(bare, OverridePayload::Bare(_)));
        assert_eq!(normalize(&bare), normalize(&wrapped(records)));
    }

    #[test]
    fn reordered_payload_yields_identical_index() {
        let first = wrapped(json!([
            {"quiz_id": 1, "due_dates": [
                {"title": "Section B", "due_at": "2024-03-01", "base": false},
                {"title": "Everyone", "due_at": "2024-02-01", "base": true},
                {"title": "Section A", "due_at": "2024-01-01"}
            ]},
            {"quiz_id": 2, "due_dates": []}
        ]));
        let second = wrapped(json!([
            {"quiz_id": 2, "due_dates": []},
            {"quiz_id": 1, "due_dates": [
                {"title": "Section A", "due_at": "2024-01-01"},
                {"title": "Everyone", "due_at": "2024-02-01", "base": true},
                {"title": "Section B", "due_at": "2024-03-01", "base": false}
            ]}
        ]));
        assert_eq!(normalize(&first), normalize(&second));
    }

    #[test]
    fn base_entry_sorts_after_non_base_with_same_title() {
        let payload = wrapped(json!([
            {"quiz_id": 1, "due_dates": [
                {"title": "X", "base": true, "due_at": "2024-01-01"},
                {"title": "X", "due_at": "2024-05-01"}
            ]}
        ]));
        let index = normalize(&payload);
        let records = index.get("1").unwrap();
        assert_eq!(records[0].base, Value::Null);
        assert_eq!(records[1].base, json!(true));
    }

    #[test]
    fn missing_fields_default_to_null_and_extras_are_dropped() {
        let payload = wrapped(json!([
            {"quiz_id": 3, "due_dates": [{"title": "T", "id": 99, "set_type": "CourseSection"}]}
        ]));
        let index = normalize(&payload);
        let record = &index.get("3").unwrap()[0];
        assert_eq!(record.title, json!("T"));
        assert_eq!(record.due_at, Value::Null);
        assert_eq!(record.base, Value::Null);
        let serialized = serde_json::to_value(record).unwrap();
        assert_eq!(serialized.as_object().unwrap().len(), 5);
    }

    #[test]
    fn records_without_id_are_skipped() {
        let payload = wrapped(json!([
            {"due_dates": [{"title": "orphan"}]},
            {"quiz_id": null, "due_dates": []},
            {"quiz_id": "not-a-number", "due_dates": []},
            {"quiz_id": 5, "due_dates": []}
        ]));
        let index = normalize(&payload);
        assert_eq!(index.ids().collect::<Vec<_>>(), vec!["5"]);
    }

    #[test]
    fn string_and_numeric_ids_share_decimal_form() {
        let payload = wrapped(json!([
            {"quiz_id": " 0042 ", "due_dates": []},
            {"quiz_id": 2076176.0, "due_dates": []}
        ]));
        let index = normalize(&payload);
        assert!(index.contains("42"));
        assert!(index.contains("2076176"));
    }

    #[test]
    fn duplicate_ids_merge_due_dates() {
        let payload = wrapped(json!([
            {"quiz_id": 9, "due_dates": [{"title": "B"}]},
            {"quiz_id": 9, "due_dates": [{"title": "A"}]}
        ]));
        let index = normalize(&payload);
        let titles: Vec<_> = index.get("9").unwrap().iter().map(|r| r.title.clone()).collect();
        assert_eq!(titles, vec![json!("A"), json!("B")]);
    }

    #[test]
    fn malformed_due_dates_are_dropped() {
        let payload = wrapped(json!([
            {"quiz_id": 4, "due_dates": null},
            {"quiz_id": 6, "due_dates": ["junk", 12, {"title": "kept"}]}
        ]));
        let index = normalize(&payload);
        assert!(index.get("4").unwrap().is_empty());
        assert_eq!(index.get("6").unwrap().len(), 1);
    }

    #[test]
    fn nested_values_are_flattened_to_text() {
        let raw = json!({"title": {"en": "Quiz"}});
        let record = NormalizedRecord::from_raw(&raw).unwrap();
        assert_eq!(record.title, json!(r#"{"en":"Quiz"}"#));
    }

    #[test]
    fn scalar_payload_is_rejected() {
        let err = OverridePayload::from_value(json!("nope")).unwrap_err();
        assert!(matches!(err, WatchError::MalformedPayload(_)));
    }

    #[test]
    fn wrapped_payload_without_key_is_empty() {
        let payload = OverridePayload::from_value(json!({"other": 1})).unwrap();
        assert!(payload.is_empty());
        assert!(normalize(&payload).is_empty());
    }

    #[test]
    fn extend_appends_continuation_records() {
        let mut first = wrapped(json!([{"quiz_id": 1, "due_dates": []}]));
        let second = OverridePayload::from_value(json!([{"quiz_id": 2, "due_dates": []}])).unwrap();
        first.extend(second);
        assert_eq!(first.len(), 2);
        assert_eq!(normalize(&first).len(), 2);
    }

    #[test]
    fn index_round_trips_through_json() {
        let payload = wrapped(json!([
            {"quiz_id": 1, "due_dates": [{"title": "A", "base": true, "due_at": "2024-01-01"}]}
        ]));
        let index = normalize(&payload);
        let text = serde_json::to_string_pretty(&index).unwrap();
        let restored: CanonicalIndex = serde_json::from_str(&text).unwrap();
        assert_eq!(index, restored);
    }
}
