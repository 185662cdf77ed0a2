//! Remote source resolver: turns a pasted link into a playable audio URL.
//!
//! Mirrors are tried once each, strictly in configured order.  The first one
//! that answers with a non-empty `audioStreams` list wins; anything else
//! (connect error, timeout, non-2xx, bad JSON, empty list) moves on to the
//! next mirror.  There is no retry within a mirror and no memory of mirror
//! health between calls.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tape_proto::config::ResolverConfig;
use tracing::{debug, info, warn};

use crate::error::ResolveError;

/// Media type a stream must declare to be picked.
pub const PLAYABLE_MIME: &str = "audio/mp4";

// ── link parsing ──────────────────────────────────────────────────────────────

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:v=|youtu\.be/)([A-Za-z0-9_-]{11})").expect("static link pattern")
    })
}

/// Pull the 11-character video id out of a pasted link.  Pure; no I/O.
pub fn extract_id(link: &str) -> Result<String, ResolveError> {
    let link = link.trim();
    if link.is_empty() {
        return Err(ResolveError::EmptyLink);
    }
    link_pattern()
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ResolveError::InvalidLink)
}

// ── wire types ────────────────────────────────────────────────────────────────

/// Body of `GET {mirror}/streams/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub audio_streams: Option<Vec<AudioStream>>,
}

/// One offered stream.  Mirrors send `null` for fields they could not fill,
/// so every field is optional; an entry missing any of them never qualifies.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub audio_only: Option<bool>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl AudioStream {
    pub fn is_playable(&self) -> bool {
        self.audio_only == Some(true)
            && self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.contains(PLAYABLE_MIME))
            && self.url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

impl StreamDescriptor {
    /// The stream list, when the mirror sent a non-empty one.
    pub fn usable_streams(&self) -> Option<&[AudioStream]> {
        self.audio_streams
            .as_deref()
            .filter(|streams| !streams.is_empty())
    }
}

/// First audio-only mp4 stream, in the order the mirror listed them.
pub fn select_stream(streams: &[AudioStream]) -> Option<&AudioStream> {
    streams.iter().find(|s| s.is_playable())
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChoice {
    pub url: String,
    pub title: String,
    pub artwork: String,
}

// ── fetch capability ──────────────────────────────────────────────────────────

/// One lookup against one mirror.
#[async_trait]
pub trait StreamFetcher: Send + Sync {
    async fn fetch_streams(&self, mirror: &str, video_id: &str)
        -> anyhow::Result<StreamDescriptor>;
}

/// `reqwest`-backed fetcher used outside tests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamFetcher for HttpFetcher {
    async fn fetch_streams(
        &self,
        mirror: &str,
        video_id: &str,
    ) -> anyhow::Result<StreamDescriptor> {
        let url = format!("{}/streams/{}", mirror.trim_end_matches('/'), video_id);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned status: {}", url, response.status());
        }

        Ok(response.json::<StreamDescriptor>().await?)
    }
}

// ── resolver ──────────────────────────────────────────────────────────────────

pub struct Resolver<F = HttpFetcher> {
    fetcher: F,
    mirrors: Vec<String>,
    mirror_timeout: Duration,
    fallback_title: String,
    fallback_artwork: String,
}

impl Resolver<HttpFetcher> {
    pub fn from_config(config: &ResolverConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.mirror_timeout_secs.max(1));
        let fetcher = HttpFetcher::new(&config.user_agent, timeout)?;
        Ok(Self::with_fetcher(fetcher, config))
    }
}

impl<F: StreamFetcher> Resolver<F> {
    pub fn with_fetcher(fetcher: F, config: &ResolverConfig) -> Self {
        Self {
            fetcher,
            mirrors: config.mirrors.clone(),
            mirror_timeout: Duration::from_secs(config.mirror_timeout_secs.max(1)),
            fallback_title: config.fallback_title.clone(),
            fallback_artwork: config.fallback_artwork.clone(),
        }
    }

    /// Override the per-mirror bound (tests use sub-second values).
    pub fn with_mirror_timeout(mut self, timeout: Duration) -> Self {
        self.mirror_timeout = timeout;
        self
    }

    pub fn mirrors(&self) -> &[String] {
        &self.mirrors
    }

    /// Validate the link, then resolve it.
    pub async fn resolve_link(&self, link: &str) -> Result<StreamChoice, ResolveError> {
        let id = extract_id(link)?;
        self.resolve(&id).await
    }

    /// Query mirrors in order and pick a stream from the first usable answer.
    pub async fn resolve(&self, video_id: &str) -> Result<StreamChoice, ResolveError> {
        let descriptor = self.first_usable(video_id).await?;
        let streams = descriptor.usable_streams().unwrap_or_default();

        let Some(stream) = select_stream(streams) else {
            warn!(
                "resolver: {} offered {} streams, none audio-only {}",
                video_id,
                streams.len(),
                PLAYABLE_MIME
            );
            return Err(ResolveError::NoPlayableStream);
        };

        Ok(StreamChoice {
            url: stream.url.clone().unwrap_or_default(),
            title: descriptor
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.fallback_title.clone()),
            artwork: descriptor
                .thumbnail_url
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.fallback_artwork.clone()),
        })
    }

    async fn first_usable(&self, video_id: &str) -> Result<StreamDescriptor, ResolveError> {
        for mirror in &self.mirrors {
            debug!("resolver: trying {} for {}", mirror, video_id);
            let lookup = self.fetcher.fetch_streams(mirror, video_id);
            match tokio::time::timeout(self.mirror_timeout, lookup).await {
                Err(_) => {
                    warn!(
                        "resolver: {} timed out after {:?}",
                        mirror, self.mirror_timeout
                    );
                }
                Ok(Err(e)) => {
                    warn!("resolver: {} failed: {}", mirror, e);
                }
                Ok(Ok(descriptor)) if descriptor.usable_streams().is_some() => {
                    info!("resolver: {} answered for {}", mirror, video_id);
                    return Ok(descriptor);
                }
                Ok(Ok(_)) => {
                    warn!("resolver: {} returned no stream list", mirror);
                }
            }
        }
        Err(ResolveError::Unresolved)
    }
}
