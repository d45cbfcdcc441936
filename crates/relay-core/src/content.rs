//! File content loading with an encoding fallback chain and a size ceiling.
//!
//! Loading never fails outright: every problem (missing file, binary data,
//! permissions) is reported inside the returned [`LoadedFile`] so a batch
//! of loads always yields one result per requested path.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 50_000;

/// Text encodings tried in order. The first that decodes the whole input wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    /// Only considered when the data starts with a byte order mark.
    Utf16Le,
    Utf16Be,
    Windows1252,
}

pub const ENCODING_CHAIN: &[TextEncoding] = &[
    TextEncoding::Utf8,
    TextEncoding::Utf16Le,
    TextEncoding::Utf16Be,
    TextEncoding::Windows1252,
];

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Windows1252 => "windows-1252",
        }
    }

    /// Decode `bytes`. With `partial` set, an incomplete trailing sequence is
    /// dropped instead of failing, so a cut-off prefix still decodes.
    fn decode(&self, bytes: &[u8], partial: bool) -> Option<String> {
        match self {
            Self::Utf8 => decode_utf8(bytes, partial),
            Self::Utf16Le => decode_utf16(bytes.strip_prefix(&[0xFF, 0xFE])?, partial, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(bytes.strip_prefix(&[0xFE, 0xFF])?, partial, u16::from_be_bytes),
            Self::Windows1252 => decode_windows_1252(bytes),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn decode_utf8(bytes: &[u8], partial: bool) -> Option<String> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        // `error_len() == None` means the input ended mid-sequence.
        Err(e) if partial && e.error_len().is_none() => {
            Some(String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned())
        }
        Err(_) => None,
    }
}

fn decode_utf16(body: &[u8], partial: bool, unit: fn([u8; 2]) -> u16) -> Option<String> {
    let body = if body.len() % 2 == 1 {
        if !partial {
            return None;
        }
        &body[..body.len() - 1]
    } else {
        body
    };

    let mut units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    if partial && units.last().is_some_and(|u| (0xD800..=0xDBFF).contains(u)) {
        units.pop();
    }
    String::from_utf16(&units).ok()
}

/// Code points for 0x80..=0x9F; `None` marks bytes windows-1252 leaves undefined.
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

fn decode_windows_1252(bytes: &[u8]) -> Option<String> {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize],
            _ => Some(b as char),
        })
        .collect()
}

/// Decoded text must look like text: no NULs and no C0 controls other than
/// the usual whitespace, backspace, form feed, and escape.
fn looks_like_text(text: &str) -> bool {
    !text.chars().any(|c| {
        c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r' | '\x08' | '\x0c' | '\x1b' | '\x7f')
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadErrorKind {
    /// The path vanished between listing and loading.
    Missing,
    /// No candidate encoding produced plausible text.
    Binary,
    AccessDenied,
    /// A directory, socket, or other non-regular file.
    NotAFile,
    Unreadable { reason: String },
}

impl std::fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("file not found (deleted or renamed)"),
            Self::Binary => f.write_str("binary or unsupported encoding"),
            Self::AccessDenied => f.write_str("permission denied"),
            Self::NotAFile => f.write_str("not a regular file"),
            Self::Unreadable { reason } => write!(f, "cannot read: {reason}"),
        }
    }
}

/// Exactly one of: full text, a truncated prefix, or a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Complete(String),
    Truncated(String),
    Failed(LoadErrorKind),
}

#[derive(Debug, Clone)]
pub struct LoadedFile {
    path: PathBuf,
    size_bytes: u64,
    encoding: Option<TextEncoding>,
    outcome: LoadOutcome,
}

impl LoadedFile {
    pub(crate) fn failed(path: &Path, size_bytes: u64, kind: LoadErrorKind) -> Self {
        Self {
            path: path.to_path_buf(),
            size_bytes,
            encoding: None,
            outcome: LoadOutcome::Failed(kind),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On-disk size at load time, not the size of the returned text.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    pub fn outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    pub fn content(&self) -> Option<&str> {
        match &self.outcome {
            LoadOutcome::Complete(text) | LoadOutcome::Truncated(text) => Some(text),
            LoadOutcome::Failed(_) => None,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Truncated(_))
    }

    pub fn error_kind(&self) -> Option<&LoadErrorKind> {
        match &self.outcome {
            LoadOutcome::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

fn classify_io(err: &std::io::Error) -> LoadErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound => LoadErrorKind::Missing,
        std::io::ErrorKind::PermissionDenied => LoadErrorKind::AccessDenied,
        _ => LoadErrorKind::Unreadable {
            reason: err.to_string(),
        },
    }
}

/// Load `path`, decoding at most `size_limit` bytes. Blocks on disk I/O.
pub fn load(path: &Path, size_limit: u64) -> LoadedFile {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return LoadedFile::failed(path, 0, classify_io(&e)),
    };
    if !metadata.is_file() {
        return LoadedFile::failed(path, metadata.len(), LoadErrorKind::NotAFile);
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return LoadedFile::failed(path, metadata.len(), classify_io(&e)),
    };

    // Read one byte past the limit so growth after `metadata` is still noticed.
    let mut bytes = Vec::new();
    if let Err(e) = file.take(size_limit.saturating_add(1)).read_to_end(&mut bytes) {
        return LoadedFile::failed(path, metadata.len(), classify_io(&e));
    }
    let truncated = bytes.len() as u64 > size_limit;
    if truncated {
        bytes.truncate(size_limit as usize);
    }
    let size_bytes = metadata.len().max(bytes.len() as u64);

    for &encoding in ENCODING_CHAIN {
        let Some(mut text) = encoding.decode(&bytes, truncated) else {
            continue;
        };
        if !looks_like_text(&text) {
            continue;
        }

        let outcome = if truncated {
            while text.len() as u64 > size_limit {
                text.pop();
            }
            LoadOutcome::Truncated(text)
        } else {
            LoadOutcome::Complete(text)
        };
        debug!(path = %path.display(), %encoding, truncated, "loaded file");
        return LoadedFile {
            path: path.to_path_buf(),
            size_bytes,
            encoding: Some(encoding),
            outcome,
        };
    }

    LoadedFile::failed(path, size_bytes, LoadErrorKind::Binary)
}

/// Loads files off the caller's thread, several at a time.
#[derive(Debug, Clone)]
pub struct ContentLoader {
    size_limit: u64,
    parallelism: usize,
}

impl Default for ContentLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_BYTES, 8)
    }
}

impl ContentLoader {
    pub fn new(size_limit: u64, parallelism: usize) -> Self {
        Self {
            size_limit,
            parallelism: parallelism.max(1),
        }
    }

    pub fn from_config(cfg: &crate::config::ContentConfig) -> Self {
        Self::new(cfg.max_file_bytes, cfg.parallel_loads)
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    pub async fn load(&self, path: PathBuf) -> LoadedFile {
        let limit = self.size_limit;
        let fallback = path.clone();
        match tokio::task::spawn_blocking(move || load(&path, limit)).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %fallback.display(), error = %e, "load task failed");
                LoadedFile::failed(
                    &fallback,
                    0,
                    LoadErrorKind::Unreadable {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// Load every path, running up to `parallelism` reads at once.
    ///
    /// Results come back in the order of `paths`, regardless of which read
    /// finishes first.
    pub async fn load_many(&self, paths: Vec<PathBuf>) -> Vec<LoadedFile> {
        let permits = Arc::new(Semaphore::new(self.parallelism));
        let handles: Vec<_> = paths
            .into_iter()
            .map(|path| {
                let permits = Arc::clone(&permits);
                let loader = self.clone();
                let task_path = path.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    loader.load(task_path).await
                });
                (path, handle)
            })
            .collect();

        let mut loaded = Vec::with_capacity(handles.len());
        for (path, handle) in handles {
            match handle.await {
                Ok(file) => loaded.push(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "load task join failed");
                    loaded.push(LoadedFile::failed(
                        &path,
                        0,
                        LoadErrorKind::Unreadable {
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }
        loaded
    }
}
