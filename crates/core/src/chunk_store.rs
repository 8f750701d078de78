use crate::error::IngestError;
use crate::models::Chunk;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ChunkStore {
    path: PathBuf,
}

impl ChunkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    // Written to a sibling file, then renamed over the log.
    pub fn save(&self, chunks: &[Chunk]) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let staging = self.staging_path();
        {
            let mut writer = BufWriter::new(fs::File::create(&staging)?);
            for chunk in chunks {
                serde_json::to_writer(&mut writer, chunk)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&staging, &self.path)?;

        info!(path = %self.path.display(), chunk_count = chunks.len(), "saved chunk log");
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<Chunk>, IngestError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::NotFound(format!(
                    "chunk log {}",
                    self.path.display()
                )));
            }
            Err(error) => return Err(error.into()),
        };

        let mut chunks = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|error| IngestError::Parse {
                line: index + 1,
                details: error.to_string(),
            })?;
            chunks.push(chunk);
        }

        debug!(path = %self.path.display(), chunk_count = chunks.len(), "loaded chunk log");
        Ok(chunks)
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

pub fn merge_chunks(existing: Vec<Chunk>, incoming: Vec<Chunk>) -> Vec<Chunk> {
    let mut merged = existing;
    let mut positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(position, chunk)| (chunk.id.clone(), position))
        .collect();

    for chunk in incoming {
        match positions.get(&chunk.id) {
            Some(&position) => merged[position] = chunk,
            None => {
                positions.insert(chunk.id.clone(), merged.len());
                merged.push(chunk);
            }
        }
    }

    merged
}
