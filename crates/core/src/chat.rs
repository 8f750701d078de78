use crate::embeddings::Embedder;
use crate::memory::{ConversationStore, MemoryView, RecordOutcome};
use crate::prompts::{answer_prompt, condense_prompt};
use crate::retriever::Retriever;
use crate::traits::{Completion, VectorStore};
use crate::{ChatOptions, ConversationTurn, RetrievedChunk, SearchError};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    Answered {
        answer: String,
        sources: Vec<RetrievedChunk>,
    },
    NoRelevantDocuments,
}

impl ChatReply {
    pub fn answer(&self) -> Option<&str> {
        match self {
            ChatReply::Answered { answer, .. } => Some(answer),
            ChatReply::NoRelevantDocuments => None,
        }
    }
}

pub struct ChatPipeline<S: ?Sized, E: ?Sized, C: ?Sized> {
    retriever: Retriever<S, E>,
    completion: Arc<C>,
    memory: Arc<ConversationStore<C>>,
    options: ChatOptions,
}

impl<S, E, C> ChatPipeline<S, E, C>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
    C: Completion + ?Sized,
{
    pub fn new(
        retriever: Retriever<S, E>,
        completion: Arc<C>,
        memory: Arc<ConversationStore<C>>,
        options: ChatOptions,
    ) -> Self {
        Self {
            retriever,
            completion,
            memory,
            options,
        }
    }

    pub fn memory(&self) -> &ConversationStore<C> {
        &self.memory
    }

    // The conversation stays locked for the whole call; errors leave it untouched.
    pub async fn ask(&self, conversation_id: &str, question: &str) -> Result<ChatReply, SearchError> {
        if question.trim().is_empty() {
            return Err(SearchError::Request("question is empty".to_string()));
        }

        let handle = self.memory.session(conversation_id);
        let mut conversation = handle.lock().await;
        let history = conversation.render();

        let standalone = self.standalone_question(question, &history).await?;
        let sources = self.retriever.retrieve(&standalone, self.options.top_k).await?;
        if sources.is_empty() {
            info!(conversation_id, "no relevant documents");
            return Ok(ChatReply::NoRelevantDocuments);
        }

        let prompt = answer_prompt(question, &history, &sources);
        let answer = self.completion.complete(&prompt).await?.trim().to_string();
        if answer.is_empty() {
            return Err(SearchError::Format("completion returned an empty answer".to_string()));
        }

        let outcome = conversation
            .record(
                ConversationTurn::new(question, answer.clone()),
                self.memory.summarizer(),
            )
            .await;
        if outcome != RecordOutcome::Stored {
            debug!(conversation_id, ?outcome, "memory policy applied");
        }

        info!(conversation_id, source_count = sources.len(), "answered question");
        Ok(ChatReply::Answered { answer, sources })
    }

    async fn standalone_question(&self, question: &str, history: &MemoryView) -> Result<String, SearchError> {
        if !self.options.condense_question || history.is_empty() {
            return Ok(question.to_string());
        }

        let rewritten = self
            .completion
            .complete(&condense_prompt(question, history))
            .await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }
        debug!(original = question, standalone = rewritten, "condensed follow-up question");
        Ok(rewritten.to_string())
    }

    pub async fn reset(&self, conversation_id: &str) -> bool {
        self.memory.reset(conversation_id).await
    }
}
