//! Token-budgeted prompt assembly
//!
//! Builds the outgoing message list for one turn: system prompt, optional
//! web-search block, optional knowledge block, dialogue history, then the
//! new user message. The budgeter fills in priority order and drops
//! history oldest-first; system and user are never dropped even when
//! they alone blow the cap.

pub mod web_search;

use tracing::warn;

use crate::llm::LlmMessage;
use crate::types::Role;

/// Crude token estimator shared by every budgeting decision
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Everything the builder needs for one turn
pub struct ContextInput<'a> {
    pub system_prompt: &'a str,
    pub web_search_block: Option<&'a str>,
    pub knowledge_block: Option<&'a str>,
    /// Chronological history, oldest first
    pub history: &'a [(Role, String)],
    pub user_message: &'a str,
    pub max_tokens: usize,
}

/// The assembled prompt plus accounting
#[derive(Debug)]
pub struct BuiltContext {
    pub messages: Vec<LlmMessage>,
    pub estimated_tokens: usize,
    /// How many history messages were dropped to fit
    pub dropped_history: usize,
}

/// Assemble the final message list under the token cap
pub fn build_context(input: &ContextInput<'_>) -> BuiltContext {
    let system_tokens = estimate_tokens(input.system_prompt);
    let user_tokens = estimate_tokens(input.user_message);
    let mut used = system_tokens + user_tokens;

    let mut include_web = false;
    let mut include_knowledge = false;

    if used > input.max_tokens {
        warn!(
            "System prompt + user message alone exceed the context cap \
             ({used} > {}); sending them anyway",
            input.max_tokens
        );
        return assemble(input, false, false, input.history.len(), used);
    }

    if let Some(block) = input.web_search_block {
        let tokens = estimate_tokens(block);
        if used + tokens <= input.max_tokens {
            include_web = true;
            used += tokens;
        }
    }

    if let Some(block) = input.knowledge_block {
        let tokens = estimate_tokens(block);
        if used + tokens <= input.max_tokens {
            include_knowledge = true;
            used += tokens;
        }
    }

    // History: newest turns are most valuable, so walk backwards until
    // the budget runs out, then emit the survivors chronologically
    let mut kept = 0;
    for (_, content) in input.history.iter().rev() {
        let tokens = estimate_tokens(content);
        if used + tokens > input.max_tokens {
            break;
        }
        used += tokens;
        kept += 1;
    }
    let dropped = input.history.len() - kept;

    assemble(input, include_web, include_knowledge, dropped, used)
}

fn assemble(
    input: &ContextInput<'_>,
    include_web: bool,
    include_knowledge: bool,
    dropped_history: usize,
    estimated_tokens: usize,
) -> BuiltContext {
    let mut messages = Vec::new();
    messages.push(LlmMessage::system(input.system_prompt));

    if include_web {
        if let Some(block) = input.web_search_block {
            messages.push(LlmMessage::system(block));
        }
    }
    if include_knowledge {
        if let Some(block) = input.knowledge_block {
            messages.push(LlmMessage::system(block));
        }
    }

    for (role, content) in input.history.iter().skip(dropped_history) {
        messages.push(LlmMessage {
            role: role.as_str().to_string(),
            content: content.clone(),
        });
    }

    messages.push(LlmMessage::user(input.user_message));

    BuiltContext {
        messages,
        estimated_tokens,
        dropped_history,
    }
}
