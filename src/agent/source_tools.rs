// MUSE Source Tools - Carousel Image Acquisition
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// This module currently handles:
// 1. Reading recent posts of public accounts (web profile endpoint)
// 2. Sampling one image from each carousel post
// 3. Downloading the sample through the download guard

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

use crate::agent::download_guard::DownloadGuard;

/// Stop visiting accounts once the download directory holds more files.
pub const MAX_FILES_IN_DIR: usize = 15;
/// Typename Instagram gives multi-image posts.
pub const CAROUSEL_TYPENAME: &str = "GraphSidecar";
/// App id the Instagram web client sends; the profile endpoint requires it.
const IG_APP_ID: &str = "936619743392459";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A batch of freshly downloaded candidate images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_batch(
        &self,
        accounts: &[String],
        max_posts_per_account: usize,
        dir: &Path,
    ) -> Vec<PathBuf>;
}

// --- web_profile_info response ---

#[derive(Debug, Deserialize)]
pub struct ProfileResponse {
    pub data: ProfileData,
}

#[derive(Debug, Deserialize)]
pub struct ProfileData {
    pub user: Option<ProfileUser>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUser {
    pub edge_owner_to_timeline_media: Connection<PostNode>,
}

#[derive(Debug, Deserialize)]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
pub struct Edge<T> {
    pub node: T,
}

#[derive(Debug, Deserialize)]
pub struct PostNode {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub shortcode: String,
    #[serde(default)]
    pub edge_sidecar_to_children: Option<Connection<SidecarNode>>,
}

#[derive(Debug, Deserialize)]
pub struct SidecarNode {
    #[serde(default)]
    pub display_url: Option<String>,
}

/// One sampled carousel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarouselPick {
    pub shortcode: String,
    pub url: String,
}

/// From the first `max_posts` posts, one random child image per carousel.
pub fn pick_carousel_images<R: Rng>(
    posts: &[PostNode],
    max_posts: usize,
    rng: &mut R,
) -> Vec<CarouselPick> {
    posts
        .iter()
        .take(max_posts)
        .filter(|post| post.typename == CAROUSEL_TYPENAME)
        .filter_map(|post| {
            let children = post.edge_sidecar_to_children.as_ref()?;
            let child = children.edges.choose(&mut *rng)?;
            let url = child.node.display_url.as_deref().filter(|u| !u.is_empty())?;
            Some(CarouselPick {
                shortcode: post.shortcode.clone(),
                url: url.to_string(),
            })
        })
        .collect()
}

pub fn image_filename(account: &str, shortcode: &str, suffix: u16) -> String {
    DownloadGuard::sanitize_filename(&format!("{}_{}_{}.jpg", account, shortcode, suffix))
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

/// Anonymous reader for public Instagram profiles.
pub struct InstagramPublicSource {
    client: reqwest::Client,
    base_url: Url,
}

impl InstagramPublicSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid source URL {:?}", base_url))?;
        Ok(Self { client, base_url })
    }

    /// Recent posts of `account`, or `None` if the profile does not exist.
    pub async fn recent_posts(&self, account: &str) -> Result<Option<Vec<PostNode>>> {
        let mut url = self.base_url.join("/api/v1/users/web_profile_info/")?;
        url.query_pairs_mut().append_pair("username", account);

        let resp = self
            .client
            .get(url)
            .header("x-ig-app-id", IG_APP_ID)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .with_context(|| format!("profile request for {}", account))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("profile request for {} returned {}", account, resp.status());
        }
        let body: ProfileResponse = resp.json().await.context("decode profile response")?;
        Ok(body.data.user.map(|user| {
            user.edge_owner_to_timeline_media
                .edges
                .into_iter()
                .map(|edge| edge.node)
                .collect()
        }))
    }

    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        DownloadGuard::validate_url(url).map_err(anyhow::Error::msg)?;

        let resp = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Failed to download image from {}, status: {}", url, resp.status());
        }
        let bytes = resp.bytes().await?;
        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("write {:?}", path))?;

        if let Err(reason) = DownloadGuard::validate_downloaded_file(path) {
            let _ = tokio::fs::remove_file(path).await;
            bail!("Rejected {:?}: {}", path, reason);
        }
        Ok(())
    }
}

#[async_trait]
impl ImageSource for InstagramPublicSource {
    async fn fetch_batch(
        &self,
        accounts: &[String],
        max_posts_per_account: usize,
        dir: &Path,
    ) -> Vec<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("[SOURCE] Cannot create {:?}: {}", dir, e);
            return Vec::new();
        }

        let mut rng = StdRng::from_entropy();
        let mut accounts = accounts.to_vec();
        accounts.shuffle(&mut rng);

        let mut selected = Vec::new();
        for account in &accounts {
            if count_files(dir) > MAX_FILES_IN_DIR {
                break;
            }
            info!("[SOURCE] Processing account: {}", account);

            let posts = match self.recent_posts(account).await {
                Ok(Some(posts)) => posts,
                Ok(None) => {
                    warn!("[SOURCE] Profile {} does not exist. Skipping.", account);
                    continue;
                }
                Err(e) => {
                    warn!("[SOURCE] Error fetching profile {}: {:#}", account, e);
                    continue;
                }
            };

            for pick in pick_carousel_images(&posts, max_posts_per_account, &mut rng) {
                let name = image_filename(account, &pick.shortcode, rng.gen_range(1000..=9999));
                let path = dir.join(name);
                match self.download(&pick.url, &path).await {
                    Ok(()) => selected.push(path),
                    Err(e) => warn!("[SOURCE] Error downloading image: {:#}", e),
                }
            }
        }

        info!("[SOURCE] Total selected images: {}", selected.len());
        selected
    }
}
