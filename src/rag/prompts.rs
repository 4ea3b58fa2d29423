use crate::llm::ChatMessage;

pub const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "Given the conversation history and the latest user question, \
which might reference context from that history, formulate a standalone question that can be \
understood without the chat history. Do NOT answer the question; just reformulate it if needed, \
otherwise return it as it is.";

pub const QA_SYSTEM_PROMPT: &str = "You are a helpful, professional AI assistant. Use the following \
context to answer the user's question precisely. Do NOT write a summary at the end of the answer. \
Answer like you are chatting with the human.";

/// Retrieved chunks are separated by a blank line.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Messages asking the model to rewrite `question` as a standalone question.
pub fn contextualize_messages(history: &[ChatMessage], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CONTEXTUALIZE_SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

/// Messages for the final answer: instructions, retrieved context, history, question.
pub fn answer_messages(
    context_chunks: &[String],
    history: &[ChatMessage],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::system(QA_SYSTEM_PROMPT));
    messages.push(ChatMessage::system(format!(
        "context: {}",
        context_chunks.join(CONTEXT_SEPARATOR)
    )));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn answer_messages_are_ordered() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let messages = answer_messages(
            &["chunk one".to_string(), "chunk two".to_string()],
            &history,
            "what now?",
        );

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[1].content, "context: chunk one\n\nchunk two");
        assert_eq!(messages[4].content, "what now?");
    }

    #[test]
    fn empty_context_still_produces_context_message() {
        let messages = answer_messages(&[], &[], "q");
        assert_eq!(messages[1].content, "context: ");
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn contextualize_wraps_history() {
        let history = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let messages = contextualize_messages(&history, "and then?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, CONTEXTUALIZE_SYSTEM_PROMPT);
        assert_eq!(messages[3].role, Role::User);
    }
}
