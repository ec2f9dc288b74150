//! Positional, field-level comparison of two canonical indexes.

use crate::changes::normalize::{CanonicalIndex, NormalizedRecord, TrackedField};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Before/after pair for one tracked field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

/// What differs at one position of an entity's record list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotDiff {
    /// The slot exists on only one side: a whole record was added or removed.
    Entry {
        before: Option<NormalizedRecord>,
        after: Option<NormalizedRecord>,
    },
    /// Both sides have a record; these tracked fields differ.
    Fields(BTreeMap<TrackedField, FieldChange>),
}

/// A differing slot and its position in the canonical ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionalDiff {
    pub index: usize,
    pub diff: SlotDiff,
}

/// All positional diffs for one entity present on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityChange {
    pub id: String,
    pub diffs: Vec<PositionalDiff>,
}

/// Result of comparing two indexes.
///
/// `added` and `removed` are ordered by numeric id; `changed` likewise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<EntityChange>,
}

impl ChangeSet {
    /// `true` when nothing was added, removed, or changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Short `+a -r ~c` summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "+{} -{} ~{}",
            self.added.len(),
            self.removed.len(),
            self.changed.len()
        )
    }
}

/// Order ids by numeric value, falling back to string order for ids that
/// do not parse.
fn numeric_id_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn sorted_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut ids: Vec<String> = ids.map(str::to_owned).collect();
    ids.sort_by(|a, b| numeric_id_cmp(a, b));
    ids
}

/// Compare two record lists slot by slot.
///
/// The shorter list is padded with empty slots, which surface as whole-entry
/// diffs rather than per-field noise.
pub fn diff_records(before: &[NormalizedRecord], after: &[NormalizedRecord]) -> Vec<PositionalDiff> {
    let len = before.len().max(after.len());
    let mut diffs = Vec::new();

    for index in 0..len {
        let left = before.get(index);
        let right = after.get(index);
        if left == right {
            continue;
        }

        let diff = match (left, right) {
            (Some(l), Some(r)) => {
                let fields: BTreeMap<TrackedField, FieldChange> = TrackedField::ALL
                    .into_iter()
                    .filter(|field| l.get(*field) != r.get(*field))
                    .map(|field| {
                        (
                            field,
                            FieldChange {
                                before: l.get(field).clone(),
                                after: r.get(field).clone(),
                            },
                        )
                    })
                    .collect();
                if fields.is_empty() {
                    continue;
                }
                SlotDiff::Fields(fields)
            }
            (l, r) => SlotDiff::Entry {
                before: l.cloned(),
                after: r.cloned(),
            },
        };

        diffs.push(PositionalDiff { index, diff });
    }

    diffs
}

/// Compute the change set from `previous` to `current`.
pub fn diff(previous: &CanonicalIndex, current: &CanonicalIndex) -> ChangeSet {
    let added = sorted_ids(current.ids().filter(|id| !previous.contains(id)));
    let removed = sorted_ids(previous.ids().filter(|id| !current.contains(id)));

    let changed = sorted_ids(current.ids().filter(|id| previous.contains(id)))
        .into_iter()
        .filter_map(|id| {
            let before = previous.get(&id).unwrap_or_default();
            let after = current.get(&id).unwrap_or_default();
            let diffs = diff_records(before, after);
            (!diffs.is_empty()).then_some(EntityChange { id, diffs })
        })
        .collect();

    ChangeSet {
        added,
        removed,
        changed,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::changes::normalize::{OverridePayload, normalize};
    use serde_json::json;

    fn index(records: Value) -> CanonicalIndex {
        normalize(&OverridePayload::from_value(records).unwrap())
    }

    fn sample() -> CanonicalIndex {
        index(json!([
            {"quiz_id": 10, "due_dates": [
                {"title": "A", "base": true, "due_at": "2024-01-01", "unlock_at": null, "lock_at": null}
            ]},
            {"quiz_id": 2, "due_dates": [{"title": "B"}, {"title": "C"}]}
        ]))
    }

    #[test]
    fn identical_indexes_have_no_changes() {
        let x = sample();
        assert!(diff(&x, &x).is_empty());
    }

    #[test]
    fn first_run_reports_everything_added() {
        let x = sample();
        let changes = diff(&CanonicalIndex::new(), &x);
        assert_eq!(changes.added, vec!["2", "10"]);
        assert!(changes.removed.is_empty());
        assert!(changes.changed.is_empty());
    }

    #[test]
    fn removed_ids_are_numerically_sorted() {
        let x = index(json!([
            {"quiz_id": 100, "due_dates": []},
            {"quiz_id": 9, "due_dates": []},
            {"quiz_id": 20, "due_dates": []}
        ]));
        let changes = diff(&x, &CanonicalIndex::new());
        assert_eq!(changes.removed, vec!["9", "20", "100"]);
    }

    #[test]
    fn single_field_edit_is_reported_at_its_position() {
        let x = sample();
        let y = index(json!([
            {"quiz_id": 10, "due_dates": [
                {"title": "A", "base": true, "due_at": "2024-02-01", "unlock_at": null, "lock_at": null}
            ]},
            {"quiz_id": 2, "due_dates": [{"title": "B"}, {"title": "C"}]}
        ]));

        let changes = diff(&x, &y);
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());

        let mut fields = BTreeMap::new();
        fields.insert(
            TrackedField::DueAt,
            FieldChange {
                before: json!("2024-01-01"),
                after: json!("2024-02-01"),
            },
        );
        assert_eq!(
            changes.changed,
            vec![EntityChange {
                id: "10".to_owned(),
                diffs: vec![PositionalDiff {
                    index: 0,
                    diff: SlotDiff::Fields(fields),
                }],
            }]
        );
    }

    #[test]
    fn extra_record_is_a_whole_entry_diff() {
        let x = index(json!([{"quiz_id": 1, "due_dates": [{"title": "A"}]}]));
        let y = index(json!([{"quiz_id": 1, "due_dates": [{"title": "A"}, {"title": "B"}]}]));

        let changes = diff(&x, &y);
        let entity = &changes.changed[0];
        assert_eq!(entity.diffs.len(), 1);
        assert_eq!(entity.diffs[0].index, 1);
        match &entity.diffs[0].diff {
            SlotDiff::Entry { before, after } => {
                assert!(before.is_none());
                assert_eq!(after.as_ref().unwrap().title, json!("B"));
            }
            other => panic!("expected entry diff, got {other:?}"),
        }

        let reverse = diff(&y, &x);
        assert!(matches!(
            &reverse.changed[0].diffs[0].diff,
            SlotDiff::Entry { before: Some(_), after: None }
        ));
    }

    #[test]
    fn reordering_alone_is_not_a_change() {
        let x = index(json!([{"quiz_id": 1, "due_dates": [{"title": "A"}, {"title": "B"}]}]));
        let y = index(json!([{"quiz_id": 1, "due_dates": [{"title": "B"}, {"title": "A"}]}]));
        assert!(diff(&x, &y).is_empty());
    }

    #[test]
    fn multiple_field_edits_listed_per_field() {
        let x = index(json!([{"quiz_id": 1, "due_dates": [
            {"title": "A", "lock_at": "2024-01-02", "unlock_at": "2024-01-01"}
        ]}]));
        let y = index(json!([{"quiz_id": 1, "due_dates": [
            {"title": "A", "lock_at": "2024-01-03", "unlock_at": null}
        ]}]));
        let changes = diff(&x, &y);
        match &changes.changed[0].diffs[0].diff {
            SlotDiff::Fields(fields) => {
                let keys: Vec<_> = fields.keys().copied().collect();
                assert_eq!(keys, vec![TrackedField::UnlockAt, TrackedField::LockAt]);
                assert_eq!(fields[&TrackedField::UnlockAt].after, Value::Null);
            }
            other => panic!("expected field diff, got {other:?}"),
        }
    }

    #[test]
    fn summary_counts_categories() {
        let changes = diff(&CanonicalIndex::new(), &sample());
        assert_eq!(changes.summary(), "+2 -0 ~0");
    }
}
