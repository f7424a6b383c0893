//! Knowledge base loading and system prompt assembly.

use callpilot_types::KnowledgeBaseSource;
use std::time::Duration;

/// Upper bound on knowledge text injected into a prompt (32 KiB).
const MAX_KNOWLEDGE_BYTES: usize = 32 * 1024;

const KNOWLEDGE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const FIRST_MESSAGE_PLACEHOLDER: &str = "{firstMessage}";
const KNOWLEDGE_PLACEHOLDER: &str = "{knowledgeBase}";

/// Reference documents fetched for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeBase {
    documents: Vec<String>,
}

impl KnowledgeBase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: Vec<String>) -> Self {
        Self { documents }
    }

    /// Fetches every source as plain text. A source that fails is logged and
    /// skipped so one broken URL does not take the assistant down.
    pub async fn load(client: &reqwest::Client, sources: &[KnowledgeBaseSource]) -> Self {
        let mut documents = Vec::with_capacity(sources.len());
        for source in sources {
            match fetch_document(client, &source.url).await {
                Ok(text) if !text.trim().is_empty() => documents.push(text),
                Ok(_) => tracing::warn!(url = %source.url, "knowledge source is empty"),
                Err(e) => tracing::warn!(url = %source.url, "skipping knowledge source: {}", e),
            }
        }
        Self { documents }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Joined document text, truncated on a char boundary to the size limit.
    pub fn context(&self) -> Option<String> {
        if self.documents.is_empty() {
            return None;
        }
        let mut joined = self.documents.join("\n\n");
        if joined.len() > MAX_KNOWLEDGE_BYTES {
            let mut cut = MAX_KNOWLEDGE_BYTES;
            while !joined.is_char_boundary(cut) {
                cut -= 1;
            }
            joined.truncate(cut);
        }
        Some(joined)
    }
}

async fn fetch_document(client: &reqwest::Client, url: &str) -> Result<String, reqwest::Error> {
    client
        .get(url)
        .timeout(KNOWLEDGE_FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

/// Renders the system prompt.
///
/// `{firstMessage}` and `{knowledgeBase}` placeholders in the template are
/// substituted. Knowledge not placed by a placeholder is appended as its own
/// section.
pub fn build_system_prompt(
    template: &str,
    first_message: Option<&str>,
    knowledge: &KnowledgeBase,
) -> String {
    let mut prompt = template.replace(FIRST_MESSAGE_PLACEHOLDER, first_message.unwrap_or(""));
    let context = knowledge.context();

    if prompt.contains(KNOWLEDGE_PLACEHOLDER) {
        prompt = prompt.replace(KNOWLEDGE_PLACEHOLDER, context.as_deref().unwrap_or(""));
    } else if let Some(context) = context {
        prompt.push_str("\n\nUse the following knowledge base to answer the caller:\n");
        prompt.push_str(&context);
    }

    if let Some(first) = first_message {
        if !template.contains(FIRST_MESSAGE_PLACEHOLDER) {
            prompt.push_str("\n\nYou opened the call by saying: \"");
            prompt.push_str(first);
            prompt.push('"');
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_template_is_untouched_without_extras() {
        let prompt = build_system_prompt("You are Ava.", None, &KnowledgeBase::empty());
        assert_eq!(prompt, "You are Ava.");
    }

    #[test]
    fn knowledge_and_first_message_are_appended() {
        let kb = KnowledgeBase::from_documents(vec!["Opening hours: 9-5.".to_string()]);
        let prompt = build_system_prompt("You are Ava.", Some("Hi, this is Ava."), &kb);
        assert!(prompt.starts_with("You are Ava."));
        assert!(prompt.contains("Opening hours: 9-5."));
        assert!(prompt.contains("\"Hi, this is Ava.\""));
    }

    #[test]
    fn placeholders_are_substituted_in_place() {
        let kb = KnowledgeBase::from_documents(vec!["FAQ".to_string()]);
        let prompt = build_system_prompt(
            "Greeting: {firstMessage}. Facts: {knowledgeBase}.",
            Some("Hello"),
            &kb,
        );
        assert_eq!(prompt, "Greeting: Hello. Facts: FAQ.");
    }

    #[test]
    fn context_is_truncated_on_char_boundary() {
        let kb = KnowledgeBase::from_documents(vec!["é".repeat(MAX_KNOWLEDGE_BYTES)]);
        let context = kb.context().unwrap();
        assert!(context.len() <= MAX_KNOWLEDGE_BYTES);
        assert!(context.chars().all(|c| c == 'é'));
    }
}
