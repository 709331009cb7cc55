//! Import and export of portable, human-diffable JSON documents

mod document;
mod export;
mod import;

pub use document::{
    DetailedTag, GlossaryName, PortableDocument, PortableTag, PortableText, ResolvedTag, FORMAT_ID,
};
pub use export::{export_document, to_json};
pub use import::{import_document, ImportIssue, ImportReport};
