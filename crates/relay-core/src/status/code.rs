use serde::{Deserialize, Serialize};

/// Change classification for one porcelain status record.
///
/// `Unknown` absorbs letters this crate does not recognise so newer git
/// releases degrade to a generic bucket instead of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Untracked,
    Unmerged,
    TypeChanged,
    Unknown,
}

impl StatusKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Copied => "copied",
            Self::Untracked => "untracked",
            Self::Unmerged => "unmerged",
            Self::TypeChanged => "type-changed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The raw two-column code (`X` = index/staged, `Y` = worktree/unstaged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode {
    staged: u8,
    unstaged: u8,
}

impl StatusCode {
    pub fn new(staged: u8, unstaged: u8) -> Self {
        Self { staged, unstaged }
    }

    pub fn staged(&self) -> char {
        self.staged as char
    }

    pub fn unstaged(&self) -> char {
        self.unstaged as char
    }

    /// The two characters exactly as git printed them.
    pub fn as_pair(&self) -> [u8; 2] {
        [self.staged, self.unstaged]
    }

    pub fn is_untracked(&self) -> bool {
        self.staged == b'?' && self.unstaged == b'?'
    }

    pub fn is_staged(&self) -> bool {
        !self.is_untracked() && !self.is_unmerged() && self.staged != b' '
    }

    pub fn is_unstaged(&self) -> bool {
        !self.is_untracked() && !self.is_unmerged() && self.unstaged != b' '
    }

    /// `DD`, `AA`, or any pair containing `U` (see git-status "Short Format").
    pub fn is_unmerged(&self) -> bool {
        matches!(
            (self.staged, self.unstaged),
            (b'D', b'D') | (b'A', b'A') | (b'U', _) | (_, b'U')
        )
    }

    /// A rename or copy in either column means the path segment is `old -> new`.
    pub fn is_rename_or_copy(&self) -> bool {
        matches!(self.staged, b'R' | b'C') || matches!(self.unstaged, b'R' | b'C')
    }

    pub fn kind(&self) -> StatusKind {
        if self.is_untracked() {
            return StatusKind::Untracked;
        }
        if self.is_unmerged() {
            return StatusKind::Unmerged;
        }
        if self.staged == b'R' || self.unstaged == b'R' {
            return StatusKind::Renamed;
        }
        if self.staged == b'C' || self.unstaged == b'C' {
            return StatusKind::Copied;
        }

        // Staged column wins when both are set (e.g. `AM`: added, then edited).
        let letter = if self.staged != b' ' {
            self.staged
        } else {
            self.unstaged
        };
        match letter {
            b'M' => StatusKind::Modified,
            b'A' => StatusKind::Added,
            b'D' => StatusKind::Deleted,
            b'T' => StatusKind::TypeChanged,
            _ => StatusKind::Unknown,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.staged(), self.unstaged())
    }
}
