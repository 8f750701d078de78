use crate::memory::MemoryView;
use crate::{ConversationTurn, RetrievedChunk};

pub fn transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

fn history_block(history: &MemoryView) -> String {
    let mut block = String::new();
    if let Some(summary) = history.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        block.push_str("Summary of earlier conversation:\n");
        block.push_str(summary);
        block.push('\n');
    }
    if !history.turns.is_empty() {
        block.push_str(&transcript(&history.turns));
        block.push('\n');
    }
    block
}

pub fn condense_prompt(question: &str, history: &MemoryView) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up \
         question to be a standalone question, in its original language.\n\n\
         Chat History:\n{}\nFollow Up Input: {}\nStandalone question:",
        history_block(history),
        question
    )
}

pub fn answer_prompt(question: &str, history: &MemoryView, context: &[RetrievedChunk]) -> String {
    let context_block = context
        .iter()
        .map(|hit| format!("[source: {}]\n{}", hit.chunk.source, hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = String::from(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n",
    );
    prompt.push_str(&context_block);
    prompt.push_str("\n\n");

    let history = history_block(history);
    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&history);
        prompt.push('\n');
    }

    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt.push_str("\nHelpful Answer:");
    prompt
}

pub fn summary_prompt(summary: &str, turns: &[ConversationTurn]) -> String {
    format!(
        "Progressively summarize the lines of conversation provided, adding onto the previous \
         summary and returning a new summary.\n\n\
         Current summary:\n{}\n\n\
         New lines of conversation:\n{}\n\n\
         New summary:",
        summary,
        transcript(turns)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;

    fn view() -> MemoryView {
        MemoryView {
            summary: Some("The user asked about pumps.".to_string()),
            turns: vec![ConversationTurn::new("What about valves?", "They regulate flow.")],
        }
    }

    #[test]
    fn answer_prompt_includes_context_history_and_question() {
        let context = vec![RetrievedChunk {
            chunk: Chunk::new("c1", "Relief valves open at the set point.", "valves.txt"),
            score: 0.9,
        }];
        let prompt = answer_prompt("When do they open?", &view(), &context);

        assert!(prompt.contains("[source: valves.txt]"));
        assert!(prompt.contains("Relief valves open at the set point."));
        assert!(prompt.contains("The user asked about pumps."));
        assert!(prompt.contains("Human: What about valves?"));
        assert!(prompt.ends_with("Question: When do they open?\nHelpful Answer:"));
    }

    #[test]
    fn empty_history_is_omitted() {
        let prompt = answer_prompt("Hi?", &MemoryView::default(), &[]);
        assert!(!prompt.contains("Conversation so far"));
    }

    #[test]
    fn summary_prompt_carries_both_parts() {
        let turns = vec![ConversationTurn::new("q1", "a1")];
        let prompt = summary_prompt("earlier", &turns);
        assert!(prompt.contains("earlier"));
        assert!(prompt.contains("Human: q1\nAssistant: a1"));
    }
}
