//! Parser for a single `git status --porcelain=v1` record.
//!
//! A record is `XY<space><path>` or, for renames and copies,
//! `XY<space><old> -> <new>`. Paths git considers unusual (spaces, quotes,
//! backslashes, control or non-ASCII bytes) arrive C-quoted and are decoded
//! back to their literal bytes here.

use std::borrow::Cow;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use thiserror::Error;

use super::code::{StatusCode, StatusKind};

/// Separator git places between the source and destination of a rename/copy.
pub const RENAME_ARROW: &[u8] = b" -> ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty status line")]
    Empty,

    #[error("status line ends inside the two-character status code")]
    TruncatedCode,

    #[error("expected a space after status code, found {found:?}")]
    MissingSeparator { found: char },

    #[error("status line has no path")]
    MissingPath,

    #[error("rename/copy status '{code}' without ' -> ' separator")]
    MissingArrow { code: String },

    #[error("quoted path is not terminated")]
    UnterminatedQuote,

    #[error("unsupported escape sequence '\\{escape}' in quoted path")]
    InvalidEscape { escape: char },

    #[error("unexpected text after quoted path")]
    TrailingData,
}

/// Repository-relative path as raw bytes, forward-slash separated.
///
/// Git paths are byte strings; nothing here assumes UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoPath(Vec<u8>);

impl RepoPath {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Convert to a relative filesystem path for the host platform.
    #[cfg(unix)]
    pub fn to_path_buf(&self) -> PathBuf {
        use std::os::unix::ffi::OsStrExt;
        PathBuf::from(std::ffi::OsStr::from_bytes(&self.0))
    }

    #[cfg(not(unix))]
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.to_string_lossy().replace('/', "\\"))
    }
}

impl std::fmt::Display for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl From<&str> for RepoPath {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Serialize for RepoPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

/// One file-level change reported by git. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    #[serde(rename = "status")]
    kind: StatusKind,
    #[serde(serialize_with = "serialize_code")]
    code: StatusCode,
    path: RepoPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    renamed_from: Option<RepoPath>,
}

fn serialize_code<S: Serializer>(code: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&code.to_string())
}

impl ChangeEntry {
    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn path(&self) -> &RepoPath {
        &self.path
    }

    pub fn renamed_from(&self) -> Option<&RepoPath> {
        self.renamed_from.as_ref()
    }

    /// Render the entry back into the porcelain v1 record it came from.
    pub fn to_porcelain(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.path.as_bytes().len() + 4);
        out.extend_from_slice(&self.code.as_pair());
        out.push(b' ');
        if let Some(from) = &self.renamed_from {
            quote_path_into(from.as_bytes(), &mut out);
            out.extend_from_slice(RENAME_ARROW);
        }
        quote_path_into(self.path.as_bytes(), &mut out);
        out
    }
}

/// Parse one porcelain status record (without its line terminator).
pub fn parse_status_line(raw: &[u8]) -> Result<ChangeEntry, ParseError> {
    let (&staged, rest) = raw.split_first().ok_or(ParseError::Empty)?;
    let (&unstaged, rest) = rest.split_first().ok_or(ParseError::TruncatedCode)?;
    let segment = match rest.split_first() {
        Some((b' ', segment)) => segment,
        Some((&other, _)) => {
            return Err(ParseError::MissingSeparator {
                found: other as char,
            })
        }
        None => return Err(ParseError::MissingPath),
    };

    let code = StatusCode::new(staged, unstaged);

    let (path, renamed_from) = if code.is_rename_or_copy() {
        let (from, to) = split_rename(segment).ok_or_else(|| ParseError::MissingArrow {
            code: code.to_string(),
        })?;
        (parse_path(to)?, Some(parse_path(from)?))
    } else {
        (parse_path(segment)?, None)
    };

    Ok(ChangeEntry {
        kind: code.kind(),
        code,
        path,
        renamed_from,
    })
}

/// Split `old -> new` into its halves, honouring a quoted `old`.
fn split_rename(segment: &[u8]) -> Option<(&[u8], &[u8])> {
    if segment.first() == Some(&b'"') {
        // A quoted source may itself contain the arrow text; skip past its
        // closing quote before looking for the separator.
        let end = quoted_len(segment)?;
        let (from, rest) = segment.split_at(end);
        let to = rest.strip_prefix(RENAME_ARROW)?;
        return Some((from, to));
    }

    let at = find_subslice(segment, RENAME_ARROW)?;
    Some((&segment[..at], &segment[at + RENAME_ARROW.len()..]))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of a leading quoted token including both quotes, if terminated.
fn quoted_len(segment: &[u8]) -> Option<usize> {
    let mut escaped = false;
    for (i, &b) in segment.iter().enumerate().skip(1) {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

fn parse_path(segment: &[u8]) -> Result<RepoPath, ParseError> {
    if segment.is_empty() {
        return Err(ParseError::MissingPath);
    }
    if segment[0] != b'"' {
        // Unquoted paths are taken verbatim, surrounding whitespace included.
        return Ok(RepoPath::from_bytes(segment));
    }

    let (bytes, consumed) = unquote(segment)?;
    if consumed != segment.len() {
        return Err(ParseError::TrailingData);
    }
    if bytes.is_empty() {
        return Err(ParseError::MissingPath);
    }
    Ok(RepoPath::from_bytes(bytes))
}

/// Decode a C-quoted token starting at `segment[0] == '"'`.
///
/// Returns the decoded bytes and the number of input bytes consumed.
fn unquote(segment: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut out = Vec::with_capacity(segment.len());
    let mut i = 1;
    while i < segment.len() {
        match segment[i] {
            b'"' => return Ok((out, i + 1)),
            b'\\' => {
                let escape = *segment.get(i + 1).ok_or(ParseError::UnterminatedQuote)?;
                i += 2;
                let decoded = match escape {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b't' => b'\t',
                    b'n' => b'\n',
                    b'v' => 0x0b,
                    b'f' => 0x0c,
                    b'r' => b'\r',
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'0'..=b'3' => {
                        let digits = segment
                            .get(i..i + 2)
                            .filter(|d| d.iter().all(|c| (b'0'..=b'7').contains(c)))
                            .ok_or(ParseError::InvalidEscape {
                                escape: escape as char,
                            })?;
                        i += 2;
                        ((escape - b'0') << 6) | ((digits[0] - b'0') << 3) | (digits[1] - b'0')
                    }
                    other => {
                        return Err(ParseError::InvalidEscape {
                            escape: other as char,
                        })
                    }
                };
                out.push(decoded);
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(ParseError::UnterminatedQuote)
}

fn needs_quoting(path: &[u8]) -> bool {
    path.iter()
        .any(|&b| b == b'"' || b == b'\\' || b == b' ' || b < 0x20 || b >= 0x7f)
}

/// Append `path` to `out`, C-quoting it the way `git status` does.
fn quote_path_into(path: &[u8], out: &mut Vec<u8>) {
    if !needs_quoting(path) {
        out.extend_from_slice(path);
        return;
    }

    out.push(b'"');
    for &b in path {
        match b {
            0x07 => out.extend_from_slice(b"\\a"),
            0x08 => out.extend_from_slice(b"\\b"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            0x0b => out.extend_from_slice(b"\\v"),
            0x0c => out.extend_from_slice(b"\\f"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b if b < 0x20 || b >= 0x7f => {
                out.push(b'\\');
                out.push(b'0' + (b >> 6));
                out.push(b'0' + ((b >> 3) & 0o7));
                out.push(b'0' + (b & 0o7));
            }
            b => out.push(b),
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ChangeEntry {
        parse_status_line(line.as_bytes()).unwrap()
    }

    #[test]
    fn staged_modification() {
        let entry = parse("M  src/app.py");
        assert_eq!(entry.kind(), StatusKind::Modified);
        assert_eq!(entry.path().as_bytes(), b"src/app.py");
        assert!(entry.renamed_from().is_none());
    }

    #[test]
    fn unstaged_modification_keeps_full_path() {
        let entry = parse(" M lib/utils.py");
        assert_eq!(entry.kind(), StatusKind::Modified);
        assert_eq!(entry.code().staged(), ' ');
        assert_eq!(entry.code().unstaged(), 'M');
        assert_eq!(entry.path().as_bytes(), b"lib/utils.py");
    }

    #[test]
    fn untracked_file() {
        let entry = parse("?? notes.txt");
        assert_eq!(entry.kind(), StatusKind::Untracked);
        assert_eq!(entry.path().to_string(), "notes.txt");
    }

    #[test]
    fn rename_splits_on_arrow() {
        let entry = parse("R  old/name.py -> src/new_name.py");
        assert_eq!(entry.kind(), StatusKind::Renamed);
        assert_eq!(entry.path().to_string(), "src/new_name.py");
        assert_eq!(entry.renamed_from().unwrap().to_string(), "old/name.py");
    }

    #[test]
    fn copy_in_worktree_column() {
        let entry = parse(" C a.txt -> b.txt");
        assert_eq!(entry.kind(), StatusKind::Copied);
        assert_eq!(entry.path().to_string(), "b.txt");
        assert_eq!(entry.renamed_from().unwrap().to_string(), "a.txt");
    }

    #[test]
    fn rename_without_arrow_is_an_error() {
        let err = parse_status_line(b"R  lonely.py").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingArrow {
                code: "R ".to_string()
            }
        );
    }

    #[test]
    fn quoted_path_with_spaces_and_quotes() {
        let entry = parse(r#"?? "dir with space/say \"hi\".txt""#);
        assert_eq!(entry.path().to_string(), r#"dir with space/say "hi".txt"#);
    }

    #[test]
    fn octal_escapes_decode_to_raw_bytes() {
        // "caf\303\251.txt" is UTF-8 "café.txt".
        let entry = parse(r#"A  "caf\303\251.txt""#);
        assert_eq!(entry.path().as_bytes(), "café.txt".as_bytes());
    }

    #[test]
    fn control_characters_decode() {
        let entry = parse(r#" M "tab\there\nnewline""#);
        assert_eq!(entry.path().as_bytes(), b"tab\there\nnewline");
    }

    #[test]
    fn quoted_rename_source_containing_arrow() {
        let entry = parse(r#"R  "a -> b.txt" -> "c d.txt""#);
        assert_eq!(entry.renamed_from().unwrap().to_string(), "a -> b.txt");
        assert_eq!(entry.path().to_string(), "c d.txt");
    }

    #[test]
    fn unquoted_whitespace_is_preserved() {
        let entry = parse("??  leading and trailing ");
        assert_eq!(entry.path().as_bytes(), b" leading and trailing ");
    }

    #[test]
    fn malformed_lines() {
        assert_eq!(parse_status_line(b""), Err(ParseError::Empty));
        assert_eq!(parse_status_line(b"M"), Err(ParseError::TruncatedCode));
        assert_eq!(parse_status_line(b"M "), Err(ParseError::MissingPath));
        assert_eq!(parse_status_line(b"M  "), Err(ParseError::MissingPath));
        assert_eq!(
            parse_status_line(b"Mx file"),
            Err(ParseError::MissingSeparator { found: 'x' })
        );
        assert_eq!(
            parse_status_line(br#"?? "never closed"#),
            Err(ParseError::UnterminatedQuote)
        );
        assert_eq!(
            parse_status_line(br#"?? "bad\q""#),
            Err(ParseError::InvalidEscape { escape: 'q' })
        );
        assert_eq!(
            parse_status_line(br#"?? "ok" tail"#),
            Err(ParseError::TrailingData)
        );
    }

    #[test]
    fn unknown_letter_is_tolerated() {
        let entry = parse("Z  future.rs");
        assert_eq!(entry.kind(), StatusKind::Unknown);
        assert_eq!(entry.path().to_string(), "future.rs");
    }

    #[test]
    fn porcelain_round_trip() {
        let lines: &[&[u8]] = &[
            b"M  src/app.py",
            b" M lib/utils.py",
            b"R  old.py -> new.py",
            b"?? \"with space.txt\"",
            b"A  \"caf\\303\\251.txt\"",
            b"RM \"a\\\"b\" -> \"tab\\tc\"",
            b"UU conflict.rs",
        ];
        for line in lines {
            let entry = parse_status_line(line).unwrap();
            let rendered = entry.to_porcelain();
            assert_eq!(&rendered[..], *line, "render of {:?}", String::from_utf8_lossy(line));
            assert_eq!(parse_status_line(&rendered).unwrap(), entry);
        }
    }
}
