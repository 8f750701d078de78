use crate::error::IngestError;
use crate::models::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextFileLoader;

impl DocumentLoader for TextFileLoader {
    fn load(&self, path: &Path) -> Result<Document, IngestError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(Document::new(text, path.to_string_lossy()))
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if has_text_extension(entry.path()) {
            files.push(entry.path().to_path_buf());
        } else {
            debug!(path = %entry.path().display(), "skipping unsupported file type");
        }
    }

    files.sort_unstable();
    files
}

pub fn filter_documents(documents: Vec<Document>, min_chars: usize, stopwords: &[String]) -> Vec<Document> {
    let total = documents.len();
    let kept: Vec<Document> = documents
        .into_iter()
        .filter(|document| {
            let content = document.text.trim();
            if content.chars().count() < min_chars {
                debug!(source = %document.source, "skipping short document");
                return false;
            }
            if stopwords.iter().any(|word| content.eq_ignore_ascii_case(word)) {
                debug!(source = %document.source, "skipping trivial document");
                return false;
            }
            true
        })
        .collect();

    info!(kept = kept.len(), total, "filtered documents");
    kept
}

pub fn load_documents<L>(source: &Path, loader: &L) -> Result<Vec<Document>, IngestError>
where
    L: DocumentLoader + ?Sized,
{
    if !source.exists() {
        return Err(IngestError::NotFound(format!(
            "document source {}",
            source.display()
        )));
    }

    let files = if source.is_file() {
        vec![source.to_path_buf()]
    } else {
        discover_text_files(source)
    };

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no text files found in {}",
            source.display()
        )));
    }

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        match loader.load(&path) {
            Ok(document) => documents.push(document),
            Err(error) => warn!(path = %path.display(), error = %error, "failed to read document"),
        }
    }

    info!(document_count = documents.len(), source = %source.display(), "loaded documents");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn stopwords() -> Vec<String> {
        vec!["api".to_string(), "experimental".to_string()]
    }

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("b.md"), "# notes")?;
        fs::write(nested.join("a.TXT"), "text")?;
        fs::write(dir.path().join("image.png"), [0u8, 1, 2])?;

        let files = discover_text_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(files.iter().all(|path| has_text_extension(path)));
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("latin1.txt");
        fs::write(&path, b"caf\xe9 au lait")?;

        let document = TextFileLoader.load(&path)?;
        assert!(document.text.starts_with("caf"));
        assert!(document.text.contains('\u{FFFD}'));
        assert_eq!(document.source, path.to_string_lossy());
        Ok(())
    }

    #[test]
    fn short_and_stopword_documents_are_dropped() {
        let long = "Pumps move fluid by converting rotational kinetic energy into flow.";
        let documents = vec![
            Document::new("too short", "a.txt"),
            Document::new("  API  ", "b.txt"),
            Document::new(long, "c.txt"),
        ];

        let kept = filter_documents(documents, 50, &stopwords());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source, "c.txt");

        let kept = filter_documents(vec![Document::new("Experimental", "d.txt")], 0, &stopwords());
        assert!(kept.is_empty());
    }

    #[test]
    fn loading_an_empty_folder_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(matches!(
            load_documents(dir.path(), &TextFileLoader),
            Err(IngestError::InvalidArgument(_))
        ));
        assert!(matches!(
            load_documents(&dir.path().join("missing"), &TextFileLoader),
            Err(IngestError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn a_single_file_source_is_loaded() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("only.txt");
        fs::write(&path, "single document")?;

        let documents = load_documents(&path, &TextFileLoader)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "single document");
        Ok(())
    }
}
