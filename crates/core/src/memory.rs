use crate::prompts::{summary_prompt, transcript};
use crate::traits::Completion;
use crate::{ConversationTurn, SearchError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_WINDOW_SIZE: usize = 3;

pub const DEFAULT_MAX_TOKEN_LIMIT: usize = 8_000;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MemoryPolicy {
    #[default]
    Buffer,
    Window {
        k: usize,
    },
    Summary {
        max_tokens: usize,
    },
}

impl FromStr for MemoryPolicy {
    type Err = SearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, argument) = match value.trim().split_once(':') {
            Some((name, argument)) => (name.trim(), Some(argument.trim())),
            None => (value.trim(), None),
        };

        let parse_argument = |default: usize| -> Result<usize, SearchError> {
            match argument {
                None => Ok(default),
                Some(raw) => raw.parse().map_err(|_| {
                    SearchError::Configuration(format!("invalid memory policy argument {raw:?}"))
                }),
            }
        };

        match name.to_ascii_lowercase().as_str() {
            "buffer" if argument.is_none() => Ok(MemoryPolicy::Buffer),
            "window" | "window_buffer" => Ok(MemoryPolicy::Window {
                k: parse_argument(DEFAULT_WINDOW_SIZE)?,
            }),
            "summary" | "summary_buffer" => Ok(MemoryPolicy::Summary {
                max_tokens: parse_argument(DEFAULT_MAX_TOKEN_LIMIT)?,
            }),
            _ => Err(SearchError::Configuration(format!(
                "unknown memory policy {value:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryView {
    pub summary: Option<String>,
    pub turns: Vec<ConversationTurn>,
}

impl MemoryView {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.turns.is_empty()
    }

    pub fn token_estimate(&self) -> usize {
        let summary = self.summary.as_deref().map(estimate_tokens).unwrap_or(0);
        summary + estimate_tokens(&transcript(&self.turns))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Stored,
    Folded,
    FoldDeferred,
}

#[derive(Debug, Clone)]
pub enum ConversationMemory {
    Buffer {
        turns: Vec<ConversationTurn>,
    },
    Window {
        k: usize,
        turns: VecDeque<ConversationTurn>,
    },
    Summary {
        max_tokens: usize,
        summary: Option<String>,
        tail: Vec<ConversationTurn>,
    },
}

impl ConversationMemory {
    pub fn new(policy: MemoryPolicy) -> Self {
        match policy {
            MemoryPolicy::Buffer => ConversationMemory::Buffer { turns: Vec::new() },
            MemoryPolicy::Window { k } => ConversationMemory::Window {
                k,
                turns: VecDeque::new(),
            },
            MemoryPolicy::Summary { max_tokens } => ConversationMemory::Summary {
                max_tokens,
                summary: None,
                tail: Vec::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.render().is_empty()
    }

    pub async fn record<C>(&mut self, turn: ConversationTurn, summarizer: &C) -> RecordOutcome
    where
        C: Completion + ?Sized,
    {
        match self {
            ConversationMemory::Buffer { turns } => {
                turns.push(turn);
                RecordOutcome::Stored
            }
            ConversationMemory::Window { k, turns } => {
                turns.push_back(turn);
                while turns.len() > *k {
                    turns.pop_front();
                }
                RecordOutcome::Stored
            }
            ConversationMemory::Summary {
                max_tokens,
                summary,
                tail,
            } => {
                tail.push(turn);
                let tail_tokens = estimate_tokens(&transcript(tail));
                if tail_tokens <= *max_tokens {
                    return RecordOutcome::Stored;
                }

                let prompt = summary_prompt(summary.as_deref().unwrap_or_default(), tail);
                match summarizer.complete(&prompt).await {
                    Ok(folded) if !folded.trim().is_empty() => {
                        debug!(folded_turns = tail.len(), tail_tokens, "folded conversation tail into summary");
                        *summary = Some(folded.trim().to_string());
                        tail.clear();
                        RecordOutcome::Folded
                    }
                    Ok(_) => {
                        warn!(tail_turns = tail.len(), "summarizer returned empty text, keeping tail");
                        RecordOutcome::FoldDeferred
                    }
                    Err(error) => {
                        warn!(tail_turns = tail.len(), error = %error, "summarizer failed, keeping tail");
                        RecordOutcome::FoldDeferred
                    }
                }
            }
        }
    }

    pub fn render(&self) -> MemoryView {
        match self {
            ConversationMemory::Buffer { turns } => MemoryView {
                summary: None,
                turns: turns.clone(),
            },
            ConversationMemory::Window { turns, .. } => MemoryView {
                summary: None,
                turns: turns.iter().cloned().collect(),
            },
            ConversationMemory::Summary { summary, tail, .. } => MemoryView {
                summary: summary.clone(),
                turns: tail.clone(),
            },
        }
    }
}

pub type ConversationHandle = Arc<Mutex<ConversationMemory>>;

pub struct ConversationStore<C: ?Sized> {
    policy: MemoryPolicy,
    summarizer: Arc<C>,
    conversations: DashMap<String, ConversationHandle>,
}

impl<C> ConversationStore<C>
where
    C: Completion + ?Sized,
{
    pub fn new(policy: MemoryPolicy, summarizer: Arc<C>) -> Self {
        info!(?policy, "conversation memory configured");
        Self {
            policy,
            summarizer,
            conversations: DashMap::new(),
        }
    }

    pub fn summarizer(&self) -> &C {
        self.summarizer.as_ref()
    }

    pub fn session(&self, id: &str) -> ConversationHandle {
        if let Some(existing) = self.conversations.get(id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationMemory::new(self.policy))));
        Arc::clone(entry.value())
    }

    pub async fn render(&self, id: &str) -> MemoryView {
        let handle = self.session(id);
        let memory = handle.lock().await;
        memory.render()
    }

    pub async fn record(&self, id: &str, question: &str, answer: &str) -> RecordOutcome {
        let handle = self.session(id);
        let mut memory = handle.lock().await;
        memory
            .record(ConversationTurn::new(question, answer), self.summarizer.as_ref())
            .await
    }

    pub async fn reset(&self, id: &str) -> bool {
        let Some(handle) = self.conversations.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let mut memory = handle.lock().await;
        *memory = ConversationMemory::new(self.policy);
        debug!(conversation_id = id, "conversation reset");
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
