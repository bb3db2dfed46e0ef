//! C7: assembles the prompt for one question and drives C8's streaming
//! completion, appending the finished answer to session history.

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use shared_llm::LlmClient;
use shared_protocol::{AnswerMode, DialogueEntry, Speaker};

use crate::agent::interfaces::CandidateContext;
use crate::asr::session::History;

const MAX_JD_REQUIREMENTS_CHARS: usize = 300;
const MAX_CV_CHARS: usize = 2000;
const MAX_HISTORY_ENTRIES: usize = 10;

pub struct AnswerAgent {
    llm: Arc<LlmClient>,
}

impl AnswerAgent {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Streams the answer token-by-token through `on_token`, then appends the
    /// full text to `history` if non-empty. Returns the accumulated text
    /// either way (possibly empty on upstream failure).
    pub async fn answer<F>(
        &self,
        question: &str,
        mode: AnswerMode,
        context: &CandidateContext,
        history: &History,
        mut on_token: F,
    ) -> String
    where
        F: FnMut(&str),
    {
        let dialogue = history.snapshot().await;
        let knowledge = context.retrieve_knowledge(question).await;
        let prompt = build_prompt(question, mode, context, &dialogue, knowledge.as_deref());

        let mut stream = self.llm.stream_generate(prompt, mode);
        let mut full = String::new();
        while let Some(delta) = stream.next().await {
            on_token(&delta);
            full.push_str(&delta);
        }

        if !full.is_empty() {
            history
                .push(DialogueEntry {
                    content: full.clone(),
                    speaker: Speaker::Assistant,
                    timestamp: Utc::now(),
                    metadata: None,
                })
                .await;
        }

        full
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn build_prompt(
    question: &str,
    mode: AnswerMode,
    context: &CandidateContext,
    dialogue: &[DialogueEntry],
    knowledge: Option<&str>,
) -> String {
    let jd_requirements = context
        .jd_requirements
        .as_deref()
        .map(|r| truncate_chars(r, MAX_JD_REQUIREMENTS_CHARS))
        .unwrap_or("(none)");
    let jd_title = context.jd_title.as_deref().unwrap_or("(none)");
    let cv_text = context.cv_text.as_deref().map(|c| truncate_chars(c, MAX_CV_CHARS)).unwrap_or("(none)");
    let knowledge = knowledge.unwrap_or("(none)");

    let recent: Vec<String> = dialogue
        .iter()
        .rev()
        .take(MAX_HISTORY_ENTRIES)
        .rev()
        .map(|entry| format!("{}: {}", entry.speaker.as_str(), entry.content))
        .collect();
    let recent = if recent.is_empty() { "(none)".to_string() } else { recent.join("\n") };

    let instruction = match mode {
        AnswerMode::Brief => "Answer in one sentence.",
        AnswerMode::Full => "Answer in 6-12 sentences.",
    };

    format!(
        "You are assisting a candidate during a live interview. Answer the current question directly and helpfully.\n\n\
Current question:\n{question}\n\n\
Job description title:\n{jd_title}\n\n\
Job description requirements:\n{jd_requirements}\n\n\
Candidate CV:\n{cv_text}\n\n\
External knowledge:\n{knowledge}\n\n\
Recent dialogue:\n{recent}\n\n\
{instruction}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_keeps_multibyte_boundaries_intact() {
        let text = "你好世界你好世界";
        let truncated = truncate_chars(text, 3);
        assert_eq!(truncated, "你好世");
    }

    #[test]
    fn build_prompt_substitutes_none_placeholders() {
        let context = CandidateContext::default();
        let prompt = build_prompt("what is ownership?", AnswerMode::Full, &context, &[], None);
        assert!(prompt.contains("Job description title:\n(none)"));
        assert!(prompt.contains("Candidate CV:\n(none)"));
        assert!(prompt.contains("External knowledge:\n(none)"));
        assert!(prompt.contains("Recent dialogue:\n(none)"));
        assert!(prompt.contains("6-12 sentences"));
    }
}
