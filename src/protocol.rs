//! Record and payload types shared by storage, managers, and the HTTP layer.

use chrono::{DateTime, NaiveDate, Utc};

/// Kind of card a memory renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    Note,
    Song,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Song => "song",
        }
    }

    /// Unknown stored values fall back to a note card.
    pub fn from_db(value: &str) -> Self {
        match value {
            "song" => Self::Song,
            _ => Self::Note,
        }
    }
}

/// Where a new memory lands in the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Scrapbook {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub name_a: String,
    pub name_b: String,
    pub share_token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MemoryPhoto {
    pub id: String,
    pub memory_id: String,
    pub storage_path: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Filled in on the way out; not stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

/// One memory row with its photos attached.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Memory {
    pub id: String,
    pub scrapbook_id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub date: Option<NaiveDate>,
    pub note: String,
    pub song_title: Option<String>,
    pub song_artist: Option<String>,
    pub song_url: Option<String>,
    pub song_album_art_url: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub photos: Vec<MemoryPhoto>,
}

/// Editable memory fields. An omitted field keeps its stored value; for the optional
/// columns `null` or an empty string clears it.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct MemoryUpdate {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub date: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub song_title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub song_artist: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub song_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub song_album_art_url: Option<Option<String>>,
}

/// Tells an explicit `null` (`Some(None)`) apart from a missing key (`None`).
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<String> as serde::Deserialize>::deserialize(deserializer).map(Some)
}

/// Scrapbook plus its memories in display order, as the editor loads it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScrapbookDetail {
    pub scrapbook: Scrapbook,
    pub memories: Vec<Memory>,
}

/// Scrapbook fields safe to show through a share link.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PublicScrapbook {
    pub id: String,
    pub title: String,
    pub name_a: String,
    pub name_b: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
}

impl PageMetadata {
    pub fn for_couple(name_a: &str, name_b: &str) -> Self {
        Self {
            title: format!("{name_a} & {name_b} — Snapbook"),
            description: format!("A love story between {name_a} and {name_b}"),
        }
    }
}

/// Read-only view served for a share token.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SharedScrapbook {
    pub scrapbook: PublicScrapbook,
    pub memories: Vec<Memory>,
    pub page: PageMetadata,
}

/// Track details pulled from the oEmbed endpoint and the track page.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SongMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// One file from a multipart upload, before conversion.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UploadFailure {
    pub file_name: String,
    pub reason: String,
}

/// Outcome of a batch upload; failures never abort the rest of the batch.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<MemoryPhoto>,
    pub skipped: Vec<String>,
    pub failed: Vec<UploadFailure>,
}
