// MUSE Publisher
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Logs in and uploads the winning image through an instagrapi-rest gateway.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use tracing::info;
use url::Url;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn login(&mut self, username: &str, password: &str) -> Result<()>;
    async fn upload(&self, image: &Path, caption: &str) -> Result<PublishedMedia>;
}

/// What the account reports back for an uploaded photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedMedia {
    pub id: String,
    pub code: Option<String>,
    pub raw: serde_json::Value,
}

impl PublishedMedia {
    /// Accepts `pk` as either a string or a number, as gateway versions differ.
    pub fn from_json(raw: serde_json::Value) -> Result<Self> {
        let id = match raw.get("pk").or_else(|| raw.get("id")) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => bail!("upload response has no media id: {}", raw),
        };
        let code = raw.get("code").and_then(|c| c.as_str()).map(String::from);
        Ok(Self { id, code, raw })
    }
}

pub struct InstagrapiPublisher {
    client: reqwest::Client,
    base_url: Url,
    session_id: Option<String>,
}

impl InstagrapiPublisher {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid publish URL {:?}", base_url))?;
        Ok(Self {
            client,
            base_url,
            session_id: None,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.session_id.is_some()
    }
}

#[async_trait]
impl Publisher for InstagrapiPublisher {
    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        info!("[PUBLISH] Logging in as {}", username);
        let resp = self
            .client
            .post(self.base_url.join("/auth/login")?)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .context("login request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            bail!("login rejected ({}): {}", status, detail.trim());
        }
        let session: String = resp.json().await.context("decode login session")?;
        if session.trim().is_empty() {
            bail!("login returned an empty session");
        }
        self.session_id = Some(session);
        info!("[PUBLISH] Login successful");
        Ok(())
    }

    async fn upload(&self, image: &Path, caption: &str) -> Result<PublishedMedia> {
        let session = self
            .session_id
            .clone()
            .ok_or_else(|| anyhow!("upload attempted before login"))?;
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("read {:?}", image))?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.png".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(image))?;
        let form = reqwest::multipart::Form::new()
            .text("sessionid", session)
            .text("caption", caption.to_string())
            .part("file", part);

        let resp = self
            .client
            .post(self.base_url.join("/photo/upload")?)
            .multipart(form)
            .send()
            .await
            .context("upload request failed")?;
        if !resp.status().is_success() {
            bail!("upload rejected: {}", resp.status());
        }
        let raw: serde_json::Value = resp.json().await.context("decode upload response")?;
        PublishedMedia::from_json(raw)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_id_from_number_or_string() {
        let numeric = PublishedMedia::from_json(json!({"pk": 3141592, "code": "Cx1"})).unwrap();
        assert_eq!(numeric.id, "3141592");
        assert_eq!(numeric.code.as_deref(), Some("Cx1"));

        let text = PublishedMedia::from_json(json!({"pk": "3141592"})).unwrap();
        assert_eq!(text.id, "3141592");
        assert!(text.code.is_none());
    }

    #[test]
    fn test_media_without_id_is_error() {
        assert!(PublishedMedia::from_json(json!({"status": "ok"})).is_err());
    }

    #[test]
    fn test_mime_by_extension() {
        assert_eq!(mime_for(Path::new("temp/sd_gen_0.png")), "image/png");
        assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
    }

    #[tokio::test]
    async fn test_upload_requires_login() {
        let publisher =
            InstagrapiPublisher::new(reqwest::Client::new(), "http://127.0.0.1:8000").unwrap();
        assert!(!publisher.is_logged_in());
        let err = publisher
            .upload(Path::new("temp/sd_gen_0.png"), "caption")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("before login"));
    }
}
