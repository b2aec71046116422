//! Song metadata lookups for Spotify track links.
//!
//! The oEmbed endpoint supplies the title and album art. The artist is not part
//! of the oEmbed payload, so it is scraped from the track page's
//! `og:description` meta tag, whose content reads `Artist · Album · Song · Year`.
//! That second fetch is best effort: any failure just leaves the artist empty.

use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, info};
use regex::Regex;
use thiserror::Error;

use crate::{config::EnrichmentConfig, protocol::SongMetadata};

static TRACK_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://open\.spotify\.com/track/[a-zA-Z0-9]+").expect("valid track regex")
});

static OG_DESCRIPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta property="og:description" content="([^"]+)""#)
        .expect("valid og:description regex")
});

const DESCRIPTION_SEPARATOR: &str = " \u{00B7} ";
const TRACK_ORIGIN: &str = "https://open.spotify.com";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SongLookupError {
    #[error("Invalid Spotify track URL")]
    InvalidUrl,

    #[error("Failed to fetch track info from Spotify")]
    UpstreamStatus(u16),

    #[error("Failed to fetch Spotify metadata")]
    Fetch(String),
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
struct OEmbedPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

pub fn is_spotify_track_url(url: &str) -> bool {
    TRACK_URL_PATTERN.is_match(url)
}

pub fn oembed_request_url(endpoint: &str, track_url: &str) -> String {
    format!("{endpoint}?url={}", urlencoding::encode(track_url))
}

/// Artist name from the first segment of the page's `og:description`, taken verbatim.
pub fn extract_artist_from_html(html: &str) -> Option<String> {
    let content = OG_DESCRIPTION_PATTERN.captures(html)?.get(1)?.as_str();
    let artist = content.split(DESCRIPTION_SEPARATOR).next()?;
    if artist.is_empty() {
        return None;
    }
    Some(artist.to_string())
}

/// Fetches oEmbed and page metadata for song memories.
pub struct SongEnricher {
    http_client: ureq::Agent,
    oembed_endpoint: String,
    page_base_url: String,
    page_user_agent: String,
}

impl SongEnricher {
    pub fn new(config: &EnrichmentConfig) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout_secs))
            .timeout_read(Duration::from_secs(config.read_timeout_secs))
            .timeout_write(Duration::from_secs(config.read_timeout_secs))
            .build();

        Self {
            http_client,
            oembed_endpoint: config.oembed_endpoint.clone(),
            page_base_url: config.page_base_url.trim_end_matches('/').to_string(),
            page_user_agent: config.page_user_agent.clone(),
        }
    }

    /// Blocking; run off the async runtime. The URL is matched as given, untrimmed.
    pub fn lookup(&self, track_url: &str) -> Result<SongMetadata, SongLookupError> {
        if !is_spotify_track_url(track_url) {
            return Err(SongLookupError::InvalidUrl);
        }

        let payload = self.fetch_oembed(track_url)?;
        let artist = self.fetch_artist(track_url);
        info!(
            "Song lookup for {} resolved title={:?} artist={:?}",
            track_url, payload.title, artist
        );

        Ok(SongMetadata {
            title: payload.title,
            artist,
            thumbnail_url: payload.thumbnail_url,
        })
    }

    fn fetch_oembed(&self, track_url: &str) -> Result<OEmbedPayload, SongLookupError> {
        let url = oembed_request_url(&self.oembed_endpoint, track_url);
        let response = match self
            .http_client
            .get(&url)
            .set("Accept", "application/json")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(SongLookupError::UpstreamStatus(status));
            }
            Err(error) => {
                return Err(SongLookupError::Fetch(format!("Request failed: {error}")));
            }
        };

        response
            .into_json::<OEmbedPayload>()
            .map_err(|error| SongLookupError::Fetch(format!("Invalid JSON response: {error}")))
    }

    /// Track page location on the configured origin.
    fn track_page_url(&self, track_url: &str) -> String {
        match track_url.strip_prefix(TRACK_ORIGIN) {
            Some(path) => format!("{}{path}", self.page_base_url),
            None => track_url.to_string(),
        }
    }

    fn fetch_artist(&self, track_url: &str) -> Option<String> {
        let page_url = self.track_page_url(track_url);
        let response = match self
            .http_client
            .get(&page_url)
            .set("User-Agent", &self.page_user_agent)
            .call()
        {
            Ok(response) => response,
            Err(error) => {
                debug!("Artist lookup skipped for {}: {}", track_url, error);
                return None;
            }
        };

        match response.into_string() {
            Ok(html) => extract_artist_from_html(&html),
            Err(error) => {
                debug!("Artist page unreadable for {}: {}", track_url, error);
                None
            }
        }
    }
}
