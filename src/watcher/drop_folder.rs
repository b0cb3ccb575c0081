//! Drop folder watcher: every visible file dropped into a folder becomes a
//! `file_drop` item, keyed by its file name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::Watcher;
use crate::error::Result;
use crate::model::{ItemType, NewWorkItem};

pub struct DropFolderWatcher {
    dir: PathBuf,
}

impl DropFolderWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Watcher for DropFolderWatcher {
    fn name(&self) -> &str {
        "drop_folder"
    }

    async fn poll(&self) -> Result<Vec<NewWorkItem>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Ignore hidden files (.gitkeep, editor swap files)
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            found.push((name, entry.path(), meta.len()));
        }
        found.sort();

        debug!(dir = %self.dir.display(), files = found.len(), "drop folder polled");
        Ok(found
            .into_iter()
            .map(|(name, path, size)| file_drop(&name, &path, size))
            .collect())
    }
}

fn file_drop(name: &str, path: &Path, size: u64) -> NewWorkItem {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let file_type = file_type(&ext);

    let body = format!(
        "## Dropped File\n\n\
         **File:** `{name}`\n\
         **Type:** {file_type} (.{ext})\n\
         **Size:** {}\n\n\
         ## Suggested Actions\n\
         - [ ] Review file contents\n\
         - [ ] Categorize and file appropriately\n\
         - [ ] Process any actionable items\n",
        human_size(size)
    );

    NewWorkItem::new(ItemType::FileDrop, "drop_folder")
        .external_id(name)
        .field("original_name", name)
        .field("file_type", file_type)
        .field("size_bytes", size)
        .field("path", path.display().to_string())
        .body(body)
}

/// File category by extension.
pub fn file_type(ext: &str) -> &'static str {
    match ext {
        "pdf" | "doc" | "docx" => "document",
        "txt" => "text",
        "md" => "markdown",
        "csv" => "data",
        "xlsx" | "xls" => "spreadsheet",
        "jpg" | "jpeg" | "png" | "gif" => "image",
        _ => "file",
    }
}

pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_map_to_categories() {
        assert_eq!(file_type("pdf"), "document");
        assert_eq!(file_type("docx"), "document");
        assert_eq!(file_type("md"), "markdown");
        assert_eq!(file_type("xls"), "spreadsheet");
        assert_eq!(file_type("jpeg"), "image");
        assert_eq!(file_type("zip"), "file");
        assert_eq!(file_type(""), "file");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(0), "0.0 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(human_size(3 * 1024u64.pow(4)), "3.0 TB");
    }
}
