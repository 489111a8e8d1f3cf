//! Prompt assembly
//!
//! Layout: agent system prompt, retrieval block (when chunks were
//! retrieved), bounded conversation history, current user turn. The chunk
//! list arrives already ranked and trimmed to its token budget.

use voxbridge_core::{ChatMessage, RetrievedChunk, Role};

/// Build the message sequence for one generation.
pub fn build_messages(
    system_prompt: &str,
    chunks: &[RetrievedChunk],
    history: &[(Role, String)],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);

    let system = if chunks.is_empty() {
        system_prompt.to_string()
    } else {
        format!("{system_prompt}\n\n{}", retrieval_block(chunks))
    };
    messages.push(ChatMessage::new(Role::System, system));

    for (role, text) in history {
        // The stored system message is replaced by the composed one above
        if *role == Role::System {
            continue;
        }
        messages.push(ChatMessage::new(*role, text.clone()));
    }

    messages.push(ChatMessage::new(Role::User, user_text));
    messages
}

fn retrieval_block(chunks: &[RetrievedChunk]) -> String {
    let mut block = String::from(
        "Relevant knowledge (cite naturally, do not mention sources aloud):\n",
    );
    for chunk in chunks {
        block.push_str(&format!("[{}] {}\n", chunk.source_id, chunk.text.trim()));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source_id: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            source_id: source_id.to_string(),
            score: 0.9,
            rank: 0,
        }
    }

    #[test]
    fn test_layout_without_chunks() {
        let messages = build_messages("be brief", &[], &[], "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_retrieval_block_embedded_in_system() {
        let messages = build_messages(
            "be brief",
            &[chunk("doc-1", "Paris is the capital of France")],
            &[],
            "capital of france?",
        );
        assert!(messages[0].content.contains("doc-1"));
        assert!(messages[0].content.contains("Paris"));
    }

    #[test]
    fn test_history_preserved_in_order_without_duplicate_system() {
        let history = vec![
            (Role::System, "stored system".to_string()),
            (Role::User, "first question".to_string()),
            (Role::Assistant, "first answer".to_string()),
        ];
        let messages = build_messages("fresh system", &[], &history, "second question");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "fresh system");
        assert_eq!(messages[1].content, "first question");
        assert_eq!(messages[2].content, "first answer");
        assert_eq!(messages[3].content, "second question");
    }
}
