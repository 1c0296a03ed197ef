//! Conversation context fed back to the model on each turn.

use std::collections::HashMap;

use kalp_types::models::{ChatMessage, MessageContext, Role};

const MIN_TOPIC_LEN: usize = 5;
const MAX_TOPICS: usize = 3;

/// Build the prompt for the model: prior turns as a transcript, then the new
/// prompt. With no usable history the prompt is sent as-is.
pub fn build_prompt(history: &[ChatMessage], prompt: &str) -> String {
    let turns: Vec<&ChatMessage> = history.iter().filter(|m| !m.is_error).collect();
    if turns.is_empty() {
        return prompt.to_string();
    }

    let mut out = String::new();
    for msg in turns {
        let speaker = match msg.role {
            Role::User => "User",
            Role::Ai => "Assistant",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(msg.message.trim());
        out.push('\n');
    }
    out.push_str("User: ");
    out.push_str(prompt);
    out.push_str("\nAssistant:");
    out
}

pub fn summarize(history: &[ChatMessage]) -> MessageContext {
    let used: Vec<&ChatMessage> = history.iter().filter(|m| !m.is_error).collect();
    MessageContext {
        has_context: !used.is_empty(),
        key_topics: key_topics(used.iter().filter(|m| m.role == Role::User).map(|m| m.message.as_str())),
        recent_messages: used.len(),
    }
}

/// Most frequent longer words across the given texts, ties alphabetical.
fn key_topics<'a>(texts: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if word.chars().count() < MIN_TOPIC_LEN {
                continue;
            }
            *counts.entry(word.to_lowercase()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(MAX_TOPICS).map(|(w, _)| w).collect()
}
