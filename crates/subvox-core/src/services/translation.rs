//! Batch subtitle translation over a chat-completions API.
//!
//! Lines are sent as a numbered list per batch and parsed back by number,
//! which keeps order stable even when the model reflows whitespace.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::audio::ProgressFn;
use crate::config::Config;
use crate::runtime::collaborators::Translator;

pub struct ApiTranslator {
    http: reqwest::Client,
    config: Arc<RwLock<Config>>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ApiTranslator {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn translate_one_batch(
        &self,
        cfg: &Config,
        batch: &[String],
        target_lang: &str,
    ) -> anyhow::Result<Vec<String>> {
        let model = if cfg.translation_model.trim().is_empty() {
            cfg.api_model.clone()
        } else {
            cfg.translation_model.clone()
        };
        let numbered = batch
            .iter()
            .enumerate()
            .map(|(i, text)| format!("{}. {}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n");
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system".to_owned(),
                    content: format!(
                        "You are a subtitle translator. Translate each numbered line into \
                         {target_lang}. Reply with the same numbered list, one line per \
                         number, and nothing else."
                    ),
                },
                ChatMessage {
                    role: "user".to_owned(),
                    content: numbered,
                },
            ],
            temperature: 0.3,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", cfg.api_base_url))
            .bearer_auth(&cfg.api_key)
            .json(&request)
            .send()
            .await
            .context("translation request failed")?
            .error_for_status()
            .context("translation API returned an error status")?;
        let body: ChatResponse = response
            .json()
            .await
            .context("invalid translation response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let parsed = parse_numbered_list(content, batch.len());
        anyhow::ensure!(
            parsed.len() == batch.len(),
            "expected {} translated lines, parsed {}",
            batch.len(),
            parsed.len()
        );
        Ok(parsed)
    }
}

#[async_trait]
impl Translator for ApiTranslator {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<Vec<String>> {
        let cfg = self.config.read().await.clone();
        let batch_size = cfg.translation_batch_size.max(1);

        let mut translated = Vec::with_capacity(texts.len());
        let batches: Vec<&[String]> = texts.chunks(batch_size).collect();
        for (i, batch) in batches.iter().enumerate() {
            let mut lines = self.translate_one_batch(&cfg, batch, target_lang).await?;
            translated.append(&mut lines);
            debug!(batch = i, lines = batch.len(), "translation batch done");
            on_progress((i + 1) as f32 / batches.len() as f32 * 100.0);
        }
        Ok(translated)
    }
}

/// Pull `expected` lines out of a `1. ...` numbered reply, by number.
fn parse_numbered_list(content: &str, expected: usize) -> Vec<String> {
    let mut slots: Vec<Option<String>> = vec![None; expected];
    for line in content.lines() {
        let line = line.trim();
        let Some((number, rest)) = line.split_once('.') else {
            continue;
        };
        let Ok(n) = number.trim().parse::<usize>() else {
            continue;
        };
        if n >= 1 && n <= expected {
            slots[n - 1] = Some(rest.trim().to_owned());
        }
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_clean_numbered_reply() {
        let reply = "1. Hello\n2. World\n3. Again";
        assert_eq!(
            parse_numbered_list(reply, 3),
            vec!["Hello", "World", "Again"]
        );
    }

    #[test]
    fn tolerates_blank_lines_and_chatter() {
        let reply = "Sure, here you go:\n\n1. One\n\n2. Two\n";
        assert_eq!(parse_numbered_list(reply, 2), vec!["One", "Two"]);
    }

    #[test]
    fn missing_numbers_shrink_the_result() {
        // The caller treats a length mismatch as a hard error.
        let reply = "1. Only";
        assert_eq!(parse_numbered_list(reply, 2).len(), 1);
    }

    #[test]
    fn out_of_range_numbers_are_ignored() {
        let reply = "1. A\n7. Stray";
        assert_eq!(parse_numbered_list(reply, 1), vec!["A"]);
    }
}
