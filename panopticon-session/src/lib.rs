//! Sessions over the analysis core.
//!
//! A session owns a [`Database`] (regions, programs, structures, comments)
//! and exposes the command surface the UI shell drives: open a program
//! image, save and reopen sessions, comment, rename, override values, and
//! undo/redo. Commands return `0` on success and a negative code on error,
//! matching the integer convention of the shell bindings.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod database;
mod pe;
mod session;

pub use database::{next_record, Database, Record, Structure};
pub use pe::PeImage;
pub use session::Session;

use uuid::Uuid;

/// Errors of the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The byte source failed.
    #[error(transparent)]
    Region(#[from] panopticon_region::RegionError),
    /// Disassembly failed fatally.
    #[error(transparent)]
    Analysis(#[from] panopticon_analysis::AnalysisError),
    /// The file is not a loadable program image.
    #[error("not a valid program image: {0}")]
    BadImage(&'static str),
    /// The image targets a machine the frontends do not cover.
    #[error("unsupported machine type {0:#06x}")]
    UnsupportedArchitecture(u16),
    /// A session file could not be parsed or written.
    #[error("malformed session file: {0}")]
    Format(#[from] serde_json::Error),
    /// No function carries the given identity.
    #[error("no function {0}")]
    UnknownFunction(Uuid),
    /// The undo stack is empty.
    #[error("nothing to undo")]
    NothingToUndo,
    /// The redo stack is empty.
    #[error("nothing to redo")]
    NothingToRedo,
}

impl SessionError {
    /// The negative status code handed across the shell boundary.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::Region(_) => -1,
            SessionError::Analysis(_) => -2,
            SessionError::BadImage(_) => -3,
            SessionError::UnsupportedArchitecture(_) => -4,
            SessionError::Format(_) => -5,
            SessionError::UnknownFunction(_) => -6,
            SessionError::NothingToUndo => -7,
            SessionError::NothingToRedo => -8,
        }
    }
}

/// Collapse a command result into the shell status convention.
pub fn status(result: Result<(), SessionError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}
