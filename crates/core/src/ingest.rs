use crate::chunk_store::{merge_chunks, ChunkStore};
use crate::chunking::{chunk_documents, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::PipelineError;
use crate::extractor::{filter_documents, load_documents, TextFileLoader};
use crate::index::VectorIndexManager;
use crate::traits::VectorStore;
use crate::{Chunk, IndexReport, IngestError, IngestionOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestionSummary {
    pub from_disk: bool,
    pub documents_loaded: usize,
    pub documents_kept: usize,
    pub chunk_count: usize,
    pub chunk_file: PathBuf,
    pub index: IndexReport,
}

struct ChunkedSource {
    documents_loaded: usize,
    documents_kept: usize,
    chunks: Vec<Chunk>,
}

async fn run_blocking<T, F>(task: F) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| IngestError::Io(std::io::Error::other(error)))?
}

pub struct IngestionPipeline<S: ?Sized, E: ?Sized> {
    options: IngestionOptions,
    chunk_store: ChunkStore,
    indexer: VectorIndexManager<S, E>,
}

impl<S, E> IngestionPipeline<S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(
        options: IngestionOptions,
        store: Arc<S>,
        embedder: Arc<E>,
    ) -> Result<Self, IngestError> {
        ChunkingConfig::from(&options).validate()?;
        let chunk_store = ChunkStore::new(options.chunk_file.clone());
        let indexer = VectorIndexManager::new(store, embedder, options.metric)
            .with_batch_size(options.batch_size);
        Ok(Self {
            options,
            chunk_store,
            indexer,
        })
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunk_store
    }

    pub async fn run(
        &self,
        source: &Path,
        from_disk: bool,
        purge: bool,
    ) -> Result<IngestionSummary, PipelineError> {
        info!(source = %source.display(), from_disk, purge, "starting ingestion");

        let chunked = if from_disk {
            ChunkedSource {
                documents_loaded: 0,
                documents_kept: 0,
                chunks: self.read_chunk_log().await?,
            }
        } else {
            let chunked = self.chunk_source(source).await?;
            self.write_chunk_log(chunked).await?
        };

        let index = self
            .indexer
            .index(&chunked.chunks, &self.options.collection_name, purge)
            .await?;

        let summary = IngestionSummary {
            from_disk,
            documents_loaded: chunked.documents_loaded,
            documents_kept: chunked.documents_kept,
            chunk_count: chunked.chunks.len(),
            chunk_file: self.chunk_store.path().to_path_buf(),
            index,
        };
        info!(
            chunks = summary.chunk_count,
            indexed = summary.index.succeeded,
            failed = summary.index.failed,
            "ingestion complete"
        );
        Ok(summary)
    }

    async fn chunk_source(&self, source: &Path) -> Result<ChunkedSource, IngestError> {
        let source = source.to_path_buf();
        let options = self.options.clone();

        run_blocking(move || {
            let documents = load_documents(&source, &TextFileLoader)?;
            let documents_loaded = documents.len();
            let kept = filter_documents(documents, options.min_document_chars, &options.stopwords);
            let documents_kept = kept.len();
            let chunks = chunk_documents(&kept, ChunkingConfig::from(&options))?;
            Ok(ChunkedSource {
                documents_loaded,
                documents_kept,
                chunks,
            })
        })
        .await
    }

    async fn read_chunk_log(&self) -> Result<Vec<Chunk>, IngestError> {
        let store = self.chunk_store.clone();
        run_blocking(move || store.load()).await
    }

    async fn write_chunk_log(&self, mut chunked: ChunkedSource) -> Result<ChunkedSource, IngestError> {
        if chunked.chunks.is_empty() {
            warn!(path = %self.chunk_store.path().display(), "no chunks produced");
        }

        let store = self.chunk_store.clone();
        let cumulative = self.options.cumulative;
        let incoming = std::mem::take(&mut chunked.chunks);

        chunked.chunks = run_blocking(move || {
            let chunks = if cumulative && store.exists() {
                merge_chunks(store.load()?, incoming)
            } else {
                incoming
            };
            store.save(&chunks)?;
            Ok(chunks)
        })
        .await?;
        Ok(chunked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryVectorStore;
    use crate::{SearchError, DEFAULT_COLLECTION};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const PUMPS: &str = "Centrifugal pumps convert rotational kinetic energy into hydrodynamic energy of the fluid flow.";
    const VALVES: &str = "Relief valves open automatically when the upstream pressure exceeds the configured set point.";

    struct Fixture {
        _dir: TempDir,
        docs: PathBuf,
        options: IngestionOptions,
        store: Arc<InMemoryVectorStore>,
    }

    fn fixture() -> Result<Fixture, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docs = dir.path().join("docs");
        fs::create_dir_all(docs.join("nested"))?;
        fs::write(docs.join("pumps.txt"), PUMPS)?;
        fs::write(docs.join("nested").join("valves.md"), VALVES)?;
        fs::write(docs.join("stub.txt"), "api")?;

        let options = IngestionOptions {
            chunk_size: 60,
            chunk_overlap: 10,
            chunk_file: dir.path().join("outputs").join("chunks.jsonl"),
            ..IngestionOptions::default()
        };

        Ok(Fixture {
            _dir: dir,
            docs,
            options,
            store: Arc::new(InMemoryVectorStore::new()),
        })
    }

    fn pipeline(fixture: &Fixture, options: IngestionOptions) -> Result<IngestionPipeline<InMemoryVectorStore, CharacterNgramEmbedder>, IngestError> {
        IngestionPipeline::new(
            options,
            fixture.store.clone(),
            Arc::new(CharacterNgramEmbedder::default()),
        )
    }

    #[tokio::test]
    async fn source_run_writes_log_and_indexes() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        let pipeline = pipeline(&fixture, fixture.options.clone())?;

        let summary = pipeline.run(&fixture.docs, false, true).await?;

        assert_eq!(summary.documents_loaded, 3);
        assert_eq!(summary.documents_kept, 2);
        assert!(summary.chunk_count >= 4);
        assert_eq!(summary.index.attempted, summary.chunk_count);
        assert_eq!(summary.index.succeeded, summary.chunk_count);
        assert!(summary.index.is_balanced());
        assert_eq!(pipeline.chunk_store().load()?.len(), summary.chunk_count);
        assert_eq!(fixture.store.record_count(DEFAULT_COLLECTION), Some(summary.chunk_count));
        Ok(())
    }

    #[tokio::test]
    async fn from_disk_reuses_the_chunk_log() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        let pipeline = pipeline(&fixture, fixture.options.clone())?;
        let first = pipeline.run(&fixture.docs, false, true).await?;

        fs::remove_dir_all(&fixture.docs)?;
        let second = pipeline.run(&fixture.docs, true, false).await?;

        assert!(second.from_disk);
        assert_eq!(second.chunk_count, first.chunk_count);
        assert_eq!(fixture.store.record_count(DEFAULT_COLLECTION), Some(first.chunk_count));
        Ok(())
    }

    #[tokio::test]
    async fn from_disk_without_a_log_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        let pipeline = pipeline(&fixture, fixture.options.clone())?;

        assert!(matches!(
            pipeline.run(&fixture.docs, true, false).await,
            Err(PipelineError::Ingest(IngestError::NotFound(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn cumulative_runs_merge_the_log() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        let options = IngestionOptions {
            cumulative: true,
            ..fixture.options.clone()
        };
        let pipeline = pipeline(&fixture, options)?;
        let first = pipeline.run(&fixture.docs, false, true).await?;

        let extra = fixture.docs.parent().map(|parent| parent.join("extra")).ok_or("no parent")?;
        fs::create_dir_all(&extra)?;
        fs::write(extra.join("bearings.txt"), "Rolling bearings need regular lubrication to avoid premature wear.")?;
        let second = pipeline.run(&extra, false, false).await?;

        assert!(second.chunk_count > first.chunk_count);
        assert_eq!(pipeline.chunk_store().load()?.len(), second.chunk_count);
        Ok(())
    }

    #[tokio::test]
    async fn metric_change_without_purge_fails_fast() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        pipeline(&fixture, fixture.options.clone())?
            .run(&fixture.docs, false, true)
            .await?;

        let euclidean = IngestionOptions {
            metric: crate::DistanceMetric::Euclidean,
            ..fixture.options.clone()
        };
        let result = pipeline(&fixture, euclidean)?.run(&fixture.docs, true, false).await;
        assert!(matches!(
            result,
            Err(PipelineError::Search(SearchError::MetricMismatch { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_source_run_clears_log_and_collection() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        let pipeline = pipeline(&fixture, fixture.options.clone())?;
        let first = pipeline.run(&fixture.docs, false, true).await?;
        assert!(first.chunk_count > 0);

        let trivial = fixture.docs.parent().map(|parent| parent.join("trivial")).ok_or("no parent")?;
        fs::create_dir_all(&trivial)?;
        fs::write(trivial.join("stub.txt"), "api")?;
        let second = pipeline.run(&trivial, false, true).await?;

        assert_eq!(second.documents_loaded, 1);
        assert_eq!(second.documents_kept, 0);
        assert_eq!(second.chunk_count, 0);
        assert!(pipeline.chunk_store().load()?.is_empty());
        assert_eq!(fixture.store.record_count(DEFAULT_COLLECTION), Some(0));

        let replay = pipeline.run(&trivial, true, false).await?;
        assert_eq!(replay.chunk_count, 0);
        Ok(())
    }

    #[test]
    fn invalid_chunking_options_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture()?;
        let options = IngestionOptions {
            chunk_size: 100,
            chunk_overlap: 100,
            ..fixture.options.clone()
        };
        assert!(matches!(
            pipeline(&fixture, options),
            Err(IngestError::Configuration(_))
        ));
        Ok(())
    }
}
