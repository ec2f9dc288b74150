//! Change detection: normalize, diff, render.
//!
//! ```text
//! raw payload ──normalize──▶ CanonicalIndex ──diff(prev, cur)──▶ ChangeSet ──render──▶ text
//! ```

pub mod diff;
pub mod normalize;
pub mod render;

pub use diff::{ChangeSet, EntityChange, FieldChange, PositionalDiff, SlotDiff, diff};
pub use normalize::{CanonicalIndex, NormalizedRecord, OverridePayload, TrackedField, normalize};
pub use render::{RenderOptions, render};
