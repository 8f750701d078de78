use crate::error::IngestError;
use crate::models::{Chunk, Document, IngestionOptions, UNKNOWN_SOURCE};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::{debug, info};

// The empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(size: usize, overlap: usize) -> Result<Self, IngestError> {
        let config = Self { size, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.size == 0 {
            return Err(IngestError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.size {
            return Err(IngestError::Configuration(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let (separator, finer) = pick_separator(text, separators);

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|piece| !piece.is_empty()).collect()
    };

    let mut output = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) < config.size {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            output.extend(merge_pieces(&pending, separator, config));
            pending.clear();
        }

        if finer.is_empty() {
            push_trimmed(&mut output, piece);
        } else {
            output.extend(split_recursive(piece, finer, config));
        }
    }

    if !pending.is_empty() {
        output.extend(merge_pieces(&pending, separator, config));
    }

    output
}

fn pick_separator<'a, 's>(text: &str, separators: &'a [&'s str]) -> (&'s str, &'a [&'s str]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (*separator, &[]);
        }
        if text.contains(*separator) {
            return (*separator, &separators[position + 1..]);
        }
    }
    ("", &[])
}

fn merge_pieces(pieces: &[&str], separator: &str, config: ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        let joiner = if window.is_empty() { 0 } else { separator_len };

        if total + len + joiner > config.size && !window.is_empty() {
            push_joined(&mut chunks, &window, separator);

            loop {
                let joiner = if window.is_empty() { 0 } else { separator_len };
                let over_budget = total > 0 && total + len + joiner > config.size;
                if total <= config.overlap && !over_budget {
                    break;
                }
                let Some(front) = window.pop_front() else {
                    break;
                };
                let trailing = if window.is_empty() { 0 } else { separator_len };
                total = total.saturating_sub(char_len(front) + trailing);
            }
        }

        total += len + if window.is_empty() { 0 } else { separator_len };
        window.push_back(piece);
    }

    if !window.is_empty() {
        push_joined(&mut chunks, &window, separator);
    }

    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    push_trimmed(chunks, &joined);
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        debug!("dropping whitespace-only chunk");
        return;
    }
    chunks.push(trimmed.to_string());
}

pub fn chunk_document(
    document: &Document,
    config: ChunkingConfig,
    global_index: u64,
) -> Result<(Vec<Chunk>, u64), IngestError> {
    config.validate()?;

    let source = if document.source.trim().is_empty() {
        UNKNOWN_SOURCE
    } else {
        document.source.as_str()
    };

    let mut chunks = Vec::new();
    let mut cursor = global_index;

    for text in split_text(&document.text, config) {
        chunks.push(Chunk::new(make_chunk_id(source, cursor, &text), text, source));
        cursor = cursor.saturating_add(1);
    }

    debug!(source, chunk_count = chunks.len(), "chunked document");
    Ok((chunks, cursor))
}

pub fn chunk(document: &Document, size: usize, overlap: usize) -> Result<Vec<Chunk>, IngestError> {
    let config = ChunkingConfig::new(size, overlap)?;
    Ok(chunk_document(document, config, 0)?.0)
}

pub fn chunk_documents(
    documents: &[Document],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;
    for document in documents {
        let (document_chunks, next_cursor) = chunk_document(document, config, cursor)?;
        cursor = next_cursor;
        chunks.extend(document_chunks);
    }

    info!(
        document_count = documents.len(),
        chunk_count = chunks.len(),
        "chunking complete"
    );
    Ok(chunks)
}

fn make_chunk_id(source: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
