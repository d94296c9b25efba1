use std::path::{Path, PathBuf};

use thiserror::Error;

/// File types the chat accepts, matched on the file extension.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["csv", "json", "xml", "html", "xlsx", "xls", "txt"];

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("{name} is not a supported file type (csv, json, xml, html, xlsx, xls, txt)")]
    Unsupported { name: String },
    #[error("{name} is not a text file")]
    NotText { name: String },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A file attached to the next turn, already decoded as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    name: String,
    content: String,
}

impl PendingUpload {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Reads the whole file. Nothing is retained on failure.
    pub async fn load(path: &Path) -> Result<Self, AttachmentError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let accepted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !accepted {
            return Err(AttachmentError::Unsupported { name });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| AttachmentError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let content = String::from_utf8(bytes).map_err(|_| AttachmentError::NotText {
            name: name.clone(),
        })?;

        Ok(Self { name, content })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_accepted_text_file() {
        let mut file = tempfile::Builder::new().suffix(".CSV").tempfile().unwrap();
        write!(file, "meal,kcal\noats,150\n").unwrap();

        let upload = PendingUpload::load(file.path()).await.unwrap();

        assert!(upload.name().ends_with(".CSV"));
        assert_eq!(upload.content(), "meal,kcal\noats,150\n");
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        let err = PendingUpload::load(file.path()).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn rejects_binary_content() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00, 0x81]).unwrap();

        let err = PendingUpload::load(file.path()).await.unwrap_err();
        assert!(matches!(err, AttachmentError::NotText { .. }));
    }

    #[tokio::test]
    async fn missing_file_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let err = PendingUpload::load(&path).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Read { .. }));
        assert!(err.to_string().contains("absent.json"));
    }
}
