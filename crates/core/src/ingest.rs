use crate::error::IngestError;
use crate::models::Document;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 4] = ["txt", "md", "markdown", "text"];

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)));

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Reads every text file under `folder` as a document, skipping unreadable ones.
pub fn load_folder_documents(folder: &Path) -> Result<IngestionReport, IngestError> {
    let files = discover_text_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no text files found in {}",
            folder.display()
        )));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match load_document(&path) {
            Ok(document) => documents.push(document),
            Err(error) => skipped_files.push(SkippedFile {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(IngestionReport {
        documents,
        skipped_files,
    })
}

pub fn load_document(path: &Path) -> Result<Document, IngestError> {
    let bytes = fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    let checksum = digest_bytes(&bytes);
    let text = String::from_utf8(bytes)
        .map_err(|error| IngestError::InvalidArgument(format!("{}: {error}", path.display())))?
        .replace("\r\n", "\n");

    let mut metadata = Map::new();
    metadata.insert(
        "sourcePath".to_string(),
        Value::String(path.to_string_lossy().to_string()),
    );
    metadata.insert("checksum".to_string(), Value::String(checksum));

    Ok(Document {
        id: generate_document_id(path),
        name: name.to_string(),
        text,
        metadata,
    })
}

fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}
