//! QuickNote core library - note repository, selection and cross-tab sync.
//!
//! This crate does no filesystem I/O; durable backends implement [`KvStore`].

mod error;
mod kv;
mod migrations;
mod note;
mod repository;
mod selection;
mod session;
mod sink;
pub mod sync;

pub use error::Error;
pub use kv::{keys, KvStore, MemoryStore};
pub use migrations::{get_pending_migrations, Migration, SCHEMA_VERSION};
pub use note::{
    extract_title, generate_id, make_preview, now, Note, NoteSummary, PREVIEW_MAX_CHARS,
    TITLE_MAX_CHARS, UNTITLED,
};
pub use repository::NoteRepository;
pub use selection::SelectionTracker;
pub use session::SyncedNotes;
pub use sink::{FaultSink, LogSink};
#[cfg(test)]
pub(crate) use sink::RecordingSink;
