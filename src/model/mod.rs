//! Core data model: texts, tags, and the assignments between them

mod assignment;
mod error;
mod ids;
mod tag;
mod text;

pub use assignment::{
    check_confidence, Assignment, AssignmentKey, Source, DEFAULT_AI_CONFIDENCE,
    MANUAL_CONFIDENCE,
};
pub use error::ValidationError;
pub use ids::{TagId, TextId, UserId};
pub use tag::{fold_name, normalize_tag_name, Tag, MAX_TAG_NAME_LEN};
pub use text::{normalize_content, Text};
