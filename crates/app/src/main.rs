use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use convrag_core::gateway::{DEFAULT_EMBED_DIMENSIONS, DEFAULT_EMBED_MODEL, DEFAULT_LLM_MODEL};
use convrag_core::{
    CharacterNgramEmbedder, ChatOptions, ChatPipeline, ChatReply, ConversationStore,
    DistanceMetric, Embedder, GatewayClient, GatewayCompletion, GatewayConfig, IngestionOptions,
    IngestionPipeline, MemoryPolicy, QdrantStore, Retriever, VectorStore, DEFAULT_CHUNK_FILE,
    DEFAULT_COLLECTION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "convrag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Active collection name
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Distance metric the collection is built and queried with.
    #[arg(long, value_enum, default_value_t = MetricArg::Cosine)]
    metric: MetricArg,

    /// Embed with the local hashed n-gram embedder instead of the gateway.
    #[arg(long, default_value_t = false)]
    local_embeddings: bool,

    #[command(flatten)]
    gateway: GatewayArgs,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[derive(Args)]
struct GatewayArgs {
    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    account_id: Option<String>,

    #[arg(long, env = "CLOUDFLARE_GATEWAY_ID")]
    gateway_id: Option<String>,

    #[arg(long, default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,

    #[arg(long, default_value_t = DEFAULT_EMBED_DIMENSIONS)]
    embed_dimensions: usize,

    #[arg(long, default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Cosine,
    Euclidean,
}

impl From<MetricArg> for DistanceMetric {
    fn from(value: MetricArg) -> Self {
        match value {
            MetricArg::Cosine => DistanceMetric::Cosine,
            MetricArg::Euclidean => DistanceMetric::Euclidean,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Chunk documents and index them into the active collection.
    Ingest {
        /// File or folder with .txt / .md documents.
        source: PathBuf,
        /// Re-index the existing chunk log instead of re-reading sources.
        #[arg(long, default_value_t = false)]
        from_disk: bool,
        /// Drop and recreate the collection first.
        #[arg(long, default_value_t = false)]
        purge: bool,
        /// Merge new chunks into the chunk log instead of replacing it.
        #[arg(long, default_value_t = false)]
        cumulative: bool,
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,
        #[arg(long, default_value_t = 100)]
        chunk_overlap: usize,
        #[arg(long, default_value = DEFAULT_CHUNK_FILE)]
        chunk_file: PathBuf,
        #[arg(long, default_value_t = 1)]
        batch_size: usize,
    },
    /// Print the nearest chunks for a query.
    Search {
        query: String,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
    /// Answer one question.
    Ask {
        question: String,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
    /// Interactive conversation on stdin. `/reset` clears the history.
    Chat {
        #[arg(long, default_value_t = 3)]
        top_k: usize,
        /// buffer, window[:k] or summary[:max_tokens]
        #[arg(long, default_value = "buffer")]
        memory: String,
        /// Use follow-up questions verbatim for retrieval.
        #[arg(long, default_value_t = false)]
        no_condense: bool,
    },
    /// List collections in the vector store.
    Collections,
}

impl GatewayArgs {
    fn client(&self) -> anyhow::Result<GatewayClient> {
        let lookup = |key: &str| match key {
            "CLOUDFLARE_API_TOKEN" => self.api_token.clone(),
            "CLOUDFLARE_ACCOUNT_ID" => self.account_id.clone(),
            "CLOUDFLARE_GATEWAY_ID" => self.gateway_id.clone(),
            _ => None,
        };
        let config = GatewayConfig::from_lookup(lookup).context("gateway credentials are missing")?;
        Ok(GatewayClient::new(config))
    }
}

impl Cli {
    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        if self.local_embeddings {
            return Ok(Arc::new(CharacterNgramEmbedder::default()));
        }
        let client = self.gateway.client()?;
        Ok(Arc::new(
            client.embedder(&self.gateway.embed_model, self.gateway.embed_dimensions),
        ))
    }

    fn completion(&self) -> anyhow::Result<Arc<GatewayCompletion>> {
        Ok(Arc::new(self.gateway.client()?.completion(&self.gateway.llm_model)))
    }

    fn retriever(&self, store: Arc<QdrantStore>) -> anyhow::Result<Retriever<QdrantStore, dyn Embedder>> {
        Ok(Retriever::new(
            store,
            self.embedder()?,
            self.collection.clone(),
            self.metric.into(),
        ))
    }

    fn chat_pipeline(
        &self,
        store: Arc<QdrantStore>,
        top_k: usize,
        policy: MemoryPolicy,
        condense_question: bool,
    ) -> anyhow::Result<ChatPipeline<QdrantStore, dyn Embedder, GatewayCompletion>> {
        let completion = self.completion()?;
        let memory = Arc::new(ConversationStore::new(policy, completion.clone()));
        let options = ChatOptions {
            top_k,
            condense_question,
        };
        Ok(ChatPipeline::new(self.retriever(store)?, completion, memory, options))
    }
}

fn print_reply(reply: &ChatReply) {
    match reply {
        ChatReply::Answered { answer, sources } => {
            println!("{answer}");
            for hit in sources {
                println!("  [{}] score={:.4} chunk={}", hit.chunk.source, hit.score, hit.chunk.id);
            }
        }
        ChatReply::NoRelevantDocuments => {
            println!("No relevant documents were found for that question.");
        }
    }
}

async fn chat_loop(
    pipeline: &ChatPipeline<QdrantStore, dyn Embedder, GatewayCompletion>,
) -> anyhow::Result<()> {
    let conversation_id = Uuid::new_v4().to_string();
    info!(conversation_id = %conversation_id, "chat session started");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                pipeline.reset(&conversation_id).await;
                println!("History cleared.");
                continue;
            }
            _ => {}
        }

        match pipeline.ask(&conversation_id, question).await {
            Ok(reply) => print_reply(&reply),
            Err(error) if error.is_retryable() => {
                println!("The service is unavailable right now, please try again: {error}");
            }
            Err(error) => println!("Request failed: {error}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer())
        .init();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "convrag boot"
    );

    let store = Arc::new(QdrantStore::new(&cli.qdrant_url)?);

    match &cli.command {
        Command::Ingest {
            source,
            from_disk,
            purge,
            cumulative,
            chunk_size,
            chunk_overlap,
            chunk_file,
            batch_size,
        } => {
            let options = IngestionOptions {
                chunk_size: *chunk_size,
                chunk_overlap: *chunk_overlap,
                chunk_file: chunk_file.clone(),
                collection_name: cli.collection.clone(),
                batch_size: *batch_size,
                metric: cli.metric.into(),
                cumulative: *cumulative,
                ..IngestionOptions::default()
            };
            let pipeline = IngestionPipeline::new(options, store, cli.embedder()?)?;
            let summary = pipeline.run(source, *from_disk, *purge).await?;

            println!(
                "{} chunks from {} document(s): {} indexed, {} skipped, {} failed into {}",
                summary.chunk_count,
                summary.documents_kept,
                summary.index.succeeded,
                summary.index.skipped,
                summary.index.failed,
                summary.index.collection
            );
            for failure in &summary.index.failures {
                println!("  failed chunk={} reason={}", failure.chunk_id, failure.reason);
            }
            for removed in &summary.index.removed_collections {
                println!("  removed stale collection {removed}");
            }
        }
        Command::Search { query, top_k } => {
            let hits = cli.retriever(store)?.retrieve(query, *top_k).await?;
            println!("query: {query}");
            for hit in hits {
                println!("[{}] score={:.4} chunk={}", hit.chunk.source, hit.score, hit.chunk.id);
                println!("{}", hit.chunk.text);
            }
        }
        Command::Ask { question, top_k } => {
            let pipeline = cli.chat_pipeline(store, *top_k, MemoryPolicy::Buffer, false)?;
            let conversation_id = Uuid::new_v4().to_string();
            match pipeline.ask(&conversation_id, question).await {
                Ok(reply) => print_reply(&reply),
                Err(error) => {
                    return Err(anyhow::Error::new(error).context("service unavailable"));
                }
            }
        }
        Command::Chat {
            top_k,
            memory,
            no_condense,
        } => {
            let policy: MemoryPolicy = memory.parse()?;
            let pipeline = cli.chat_pipeline(store, *top_k, policy, !*no_condense)?;
            chat_loop(&pipeline).await?;
        }
        Command::Collections => {
            for name in store.list_collections().await? {
                let marker = if name == cli.collection { "*" } else { " " };
                println!("{marker} {name}");
            }
        }
    }

    Ok(())
}
