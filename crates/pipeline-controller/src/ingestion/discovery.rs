//! Corpus walker and file classification

use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::storage::StatusStore;
use crate::types::{derive_file_id, NewFile};

const AUDIO_EXTS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg"];
const VIDEO_EXTS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm"];
const DOCUMENT_EXTS: &[&str] = &["pdf", "epub", "docx", "txt", "md"];

/// Source type recorded as `file_type`
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    /// Classify by extension; `None` for files the pipeline does not handle
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        if AUDIO_EXTS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else if VIDEO_EXTS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if DOCUMENT_EXTS.contains(&ext.as_str()) {
            Some(MediaKind::Document)
        } else {
            None
        }
    }
}

/// A classified file found under the corpus root
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated; the file id is derived from it
    pub relative: String,
    pub kind: MediaKind,
}

impl DiscoveredFile {
    pub fn file_id(&self) -> String {
        derive_file_id(&self.relative)
    }

    fn to_new_file(&self) -> NewFile {
        NewFile {
            file_id: self.file_id(),
            filename: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.relative.clone()),
            file_type: self.kind.as_str().to_string(),
            source_path: Some(self.path.to_string_lossy().to_string()),
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub root: String,
    pub discovered: usize,
    pub registered: usize,
    pub already_known: usize,
    pub ignored: usize,
    pub registered_ids: Vec<String>,
}

/// Walks a corpus directory
pub struct CorpusScanner {
    root: PathBuf,
}

impl CorpusScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Classified files under the root (sorted by relative path) and the
    /// number of files skipped as unsupported.
    pub fn discover(&self) -> Result<(Vec<DiscoveredFile>, usize)> {
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "Corpus root {} is not a directory",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        let mut ignored = 0;

        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(kind) = MediaKind::from_path(path) else {
                ignored += 1;
                continue;
            };

            let relative = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");

            files.push(DiscoveredFile {
                path: path.to_path_buf(),
                relative,
                kind,
            });
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok((files, ignored))
    }

    /// Register every discovered file the store does not know yet
    pub fn scan_into(&self, store: &dyn StatusStore) -> Result<ScanReport> {
        let (files, ignored) = self.discover()?;
        let mut report = ScanReport {
            root: self.root.display().to_string(),
            discovered: files.len(),
            ignored,
            ..Default::default()
        };

        for file in &files {
            let (record, created) = store.register(file.to_new_file())?;
            if created {
                tracing::debug!("Discovered {} as {}", file.relative, record.file_id);
                report.registered += 1;
                report.registered_ids.push(record.file_id);
            } else {
                report.already_known += 1;
            }
        }

        tracing::info!(
            "Corpus scan of {}: {} discovered, {} new, {} known, {} ignored",
            report.root,
            report.discovered,
            report.registered,
            report.already_known,
            report.ignored
        );
        Ok(report)
    }
}
