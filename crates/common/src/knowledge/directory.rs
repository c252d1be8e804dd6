//! Known-document directory used for citation numbering

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One document in the knowledge source, as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDocument {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

impl KnownDocument {
    pub fn new(name: impl Into<String>, size_bytes: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            modified_at,
        }
    }

    /// Name without its final extension
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

/// Ordered listing of the documents behind the knowledge source
///
/// A document's 1-based position in the listing is its external citation
/// number. Implementations must return a stable order.
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<KnownDocument>>;
}

/// Directory over the regular files of a local folder, sorted by name
pub struct LocalDocumentDirectory {
    root: PathBuf,
}

impl LocalDocumentDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DocumentDirectory for LocalDocumentDirectory {
    async fn list_documents(&self) -> Result<Vec<KnownDocument>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut documents = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
            documents.push(KnownDocument::new(name, metadata.len(), modified_at));
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }
}

/// Fixed, in-memory directory
///
/// Used when no document listing is configured, and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDocumentDirectory {
    documents: Vec<KnownDocument>,
}

impl StaticDocumentDirectory {
    pub fn new(documents: Vec<KnownDocument>) -> Self {
        Self { documents }
    }

    /// Directory of names in the given order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| KnownDocument::new(name, 0, None))
                .collect(),
        )
    }
}

#[async_trait]
impl DocumentDirectory for StaticDocumentDirectory {
    async fn list_documents(&self) -> Result<Vec<KnownDocument>> {
        Ok(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem() {
        assert_eq!(KnownDocument::new("guide.pdf", 0, None).stem(), "guide");
        assert_eq!(KnownDocument::new("archive.tar.gz", 0, None).stem(), "archive.tar");
        assert_eq!(KnownDocument::new(".env", 0, None).stem(), ".env");
        assert_eq!(KnownDocument::new("README", 0, None).stem(), "README");
    }

    #[tokio::test]
    async fn test_local_directory_sorted_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-pricing.md"), "pricing").unwrap();
        std::fs::write(dir.path().join("a-guide.pdf"), "guide body").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let documents = LocalDocumentDirectory::new(dir.path()).list_documents().await.unwrap();
        let names: Vec<_> = documents.iter().map(|d| d.name.as_str()).collect();

        assert_eq!(names, vec!["a-guide.pdf", "b-pricing.md"]);
        assert_eq!(documents[0].size_bytes, 10);
        assert!(documents[0].modified_at.is_some());
    }

    #[tokio::test]
    async fn test_local_directory_missing_root_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LocalDocumentDirectory::new(dir.path().join("absent"));
        assert!(missing.list_documents().await.is_err());
    }

    #[tokio::test]
    async fn test_static_directory_keeps_order() {
        let directory = StaticDocumentDirectory::from_names(["z.pdf", "a.pdf"]);
        let documents = directory.list_documents().await.unwrap();
        assert_eq!(documents[0].name, "z.pdf");
        assert_eq!(documents[1].name, "a.pdf");
    }
}
