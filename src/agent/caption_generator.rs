// MUSE Caption Generator
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Two-stage captioning over Ollama: a vision model describes each image,
// then a small text model turns the descriptions into one caption.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

pub const DESCRIBE_PROMPT: &str = "Describe this image in detail.";

/// A chat-style model endpoint. `images` may be empty for text-only turns.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, model: &str, prompt: &str, images: &[PathBuf]) -> Result<String>;
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

/// Ollama native chat API (`/api/chat`), non-streaming.
pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: Url,
}

impl OllamaChat {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self> {
        // Ollama's native API lives at the root, not under the OpenAI-style /v1.
        let base = base_url.trim_end_matches('/').trim_end_matches("/v1");
        let endpoint = Url::parse(&format!("{}/api/chat", base))
            .with_context(|| format!("invalid Ollama URL {:?}", base_url))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, model: &str, prompt: &str, images: &[PathBuf]) -> Result<String> {
        let mut encoded = Vec::with_capacity(images.len());
        for path in images {
            encoded.push(encode_image(path).await?);
        }
        let request = build_chat_request(model, prompt, encoded);

        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Ollama request to {} failed", self.endpoint))?;
        if !resp.status().is_success() {
            bail!("Ollama API Error: {}", resp.status());
        }
        let body: ChatResponse = resp.json().await.context("decode Ollama response")?;
        Ok(body.message.content)
    }
}

pub fn build_chat_request(model: &str, prompt: &str, images: Vec<String>) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
            images,
        }],
        stream: false,
    }
}

async fn encode_image(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read image {:?}", path))?;
    Ok(BASE64.encode(bytes))
}

pub fn build_caption_prompt(descriptions: &[String]) -> String {
    let combined = descriptions.join("\n");
    format!(
        "Below are descriptions of several images:\n\n{}\n\n\
         Please craft a short, visually descriptive and engaging Instagram caption that reflects the collective theme of these images, \
         and includes a few relevant hashtags. Answer only with caption content.",
        combined
    )
}

pub struct CaptionGenerator {
    chat: Box<dyn ChatModel>,
    vision_model: String,
    caption_model: String,
}

impl CaptionGenerator {
    pub fn new(chat: Box<dyn ChatModel>, vision_model: &str, caption_model: &str) -> Self {
        Self {
            chat,
            vision_model: vision_model.to_string(),
            caption_model: caption_model.to_string(),
        }
    }

    /// Stage 1: one description per image. Failed or blank replies are dropped.
    pub async fn describe_images(&self, image_paths: &[PathBuf]) -> Vec<String> {
        let mut descriptions = Vec::new();
        for path in image_paths {
            match self
                .chat
                .chat(&self.vision_model, DESCRIBE_PROMPT, std::slice::from_ref(path))
                .await
            {
                Ok(reply) => {
                    let reply = reply.trim();
                    if reply.is_empty() {
                        warn!("[CAPTION] Empty description for {:?}", path);
                    } else {
                        descriptions.push(reply.to_string());
                    }
                }
                Err(e) => warn!("[CAPTION] Could not describe {:?}: {:#}", path, e),
            }
        }
        info!(
            "[CAPTION] Described {}/{} images with {}",
            descriptions.len(),
            image_paths.len(),
            self.vision_model
        );
        descriptions
    }

    /// Caption for the images, or `""` when no description came back.
    pub async fn generate_caption(&self, image_paths: &[PathBuf]) -> Result<String> {
        let descriptions = self.describe_images(image_paths).await;
        if descriptions.is_empty() {
            warn!("[CAPTION] No descriptions generated. Cannot produce a caption.");
            return Ok(String::new());
        }

        let prompt = build_caption_prompt(&descriptions);
        let caption = self
            .chat
            .chat(&self.caption_model, &prompt, &[])
            .await
            .with_context(|| format!("caption request to {}", self.caption_model))?;
        let caption = caption.trim().to_string();
        info!("[CAPTION] {}", caption);
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<(String, usize)>>>;

    /// Replies from a script and records (model, image count) per call.
    struct ScriptedChat {
        replies: Mutex<Vec<Result<String>>>,
        calls: CallLog,
    }

    impl ScriptedChat {
        fn new(replies: Vec<Result<String>>) -> (Self, CallLog) {
            let calls = CallLog::default();
            let chat = Self {
                replies: Mutex::new(replies),
                calls: calls.clone(),
            };
            (chat, calls)
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, model: &str, _prompt: &str, images: &[PathBuf]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), images.len()));
            self.replies.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn test_request_omits_images_for_text_turns() {
        let req = build_chat_request("llama3.2:1b", "hello", Vec::new());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json["messages"][0].get("images").is_none());

        let req = build_chat_request("llava:13b", "describe", vec!["AAAA".to_string()]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["images"][0], "AAAA");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model":"llava:13b","message":{"role":"assistant","content":"A cat."},"done":true}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "A cat.");
    }

    #[test]
    fn test_caption_prompt_joins_descriptions() {
        let prompt = build_caption_prompt(&["one".to_string(), "two".to_string()]);
        assert!(prompt.starts_with("Below are descriptions of several images:\n\none\ntwo\n\n"));
        assert!(prompt.ends_with("Answer only with caption content."));
    }

    #[test]
    fn test_ollama_endpoint_strips_v1() {
        let chat = OllamaChat::new(reqwest::Client::new(), "http://localhost:11434/v1/").unwrap();
        assert_eq!(chat.endpoint.as_str(), "http://localhost:11434/api/chat");
    }

    #[tokio::test]
    async fn test_no_descriptions_yields_empty_caption() {
        let (chat, calls) = ScriptedChat::new(vec![
            Ok("   ".to_string()),
            Err(anyhow::anyhow!("model offline")),
        ]);
        let generator = CaptionGenerator::new(Box::new(chat), "llava:13b", "llama3.2:1b");
        let caption = generator
            .generate_caption(&[PathBuf::from("a.jpg"), PathBuf::from("b.jpg")])
            .await
            .unwrap();
        assert_eq!(caption, "");
        // Only the two describe calls; the caption model is never asked.
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_two_stage_caption() {
        let (chat, calls) = ScriptedChat::new(vec![
            Ok(" A mountain at dawn. ".to_string()),
            Ok("A quiet lake.".to_string()),
            Ok("  Stillness everywhere #calm  ".to_string()),
        ]);
        let generator = CaptionGenerator::new(Box::new(chat), "llava:13b", "llama3.2:1b");
        let caption = generator
            .generate_caption(&[PathBuf::from("a.jpg"), PathBuf::from("b.jpg")])
            .await
            .unwrap();
        assert_eq!(caption, "Stillness everywhere #calm");

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("llava:13b".to_string(), 1),
                ("llava:13b".to_string(), 1),
                ("llama3.2:1b".to_string(), 0),
            ]
        );
    }
}
