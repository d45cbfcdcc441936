//! Working-tree change ingestion: porcelain parsing and change-set building.

pub mod changeset;
pub mod code;
pub mod parse;

pub use changeset::{BuildError, ChangeSet, ChangeSetBuilder, LineWarning};
pub use code::{StatusCode, StatusKind};
pub use parse::{parse_status_line, ChangeEntry, ParseError, RepoPath};
