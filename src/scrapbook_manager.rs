//! Scrapbook, memory, and photo operations on top of the database and photo bucket.
//!
//! Every owner-facing call takes the caller's user id and treats records owned
//! by someone else exactly like missing ones.

use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use regex::Regex;
use uuid::Uuid;

use crate::{
    db_manager::{DbManager, MemoryFields},
    error::SnapbookError,
    image_pipeline::{self, ConversionError},
    memory_order,
    photo_store::{build_storage_path, PhotoStore},
    protocol::{
        InsertPosition, Memory, MemoryKind, MemoryPhoto, MemoryUpdate, MoveDirection,
        PageMetadata, PublicScrapbook, Scrapbook, ScrapbookDetail, SharedScrapbook,
        UploadFailure, UploadFile, UploadReport,
    },
};

/// Hyphenated UUID, any case. Simple, braced and URN forms are not share tokens.
static SHARE_TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid share token regex")
});

pub fn is_share_token(token: &str) -> bool {
    SHARE_TOKEN_PATTERN.is_match(token)
}

pub struct ScrapbookManager {
    db_manager: DbManager,
    photo_store: PhotoStore,
    jpeg_quality: u8,
    max_upload_bytes: usize,
}

/// Both names trimmed and present; the title joins them with " + ".
fn validated_names(name_a: &str, name_b: &str) -> Result<(String, String, String), SnapbookError> {
    let name_a = name_a.trim();
    let name_b = name_b.trim();
    if name_a.is_empty() || name_b.is_empty() {
        return Err(SnapbookError::Validation(
            "Both names are required".to_string(),
        ));
    }
    Ok((
        format!("{name_a} + {name_b}"),
        name_a.to_string(),
        name_b.to_string(),
    ))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Value to store for an optional column: unchanged when omitted, cleared when empty.
fn merged<'a>(change: &'a Option<Option<String>>, current: &'a Option<String>) -> Option<&'a str> {
    match change {
        None => current.as_deref(),
        Some(value) => non_empty(value.as_deref()),
    }
}

fn parse_memory_date(value: Option<&str>) -> Result<Option<NaiveDate>, SnapbookError> {
    match non_empty(value) {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| SnapbookError::Validation(format!("Invalid date: {value}"))),
    }
}

impl ScrapbookManager {
    pub fn new(
        db_manager: DbManager,
        photo_store: PhotoStore,
        jpeg_quality: u8,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            db_manager,
            photo_store,
            jpeg_quality,
            max_upload_bytes,
        }
    }

    pub fn photo_store(&self) -> &PhotoStore {
        &self.photo_store
    }

    fn owned_scrapbook(&self, user_id: &str, id: &str) -> Result<Scrapbook, SnapbookError> {
        match self.db_manager.get_scrapbook(id)? {
            Some(scrapbook) if scrapbook.user_id == user_id => Ok(scrapbook),
            _ => Err(SnapbookError::NotFound("Scrapbook")),
        }
    }

    fn owned_memory(
        &self,
        user_id: &str,
        memory_id: &str,
    ) -> Result<(Scrapbook, Memory), SnapbookError> {
        let memory = self
            .db_manager
            .get_memory(memory_id)?
            .ok_or(SnapbookError::NotFound("Memory"))?;
        let scrapbook = self
            .owned_scrapbook(user_id, &memory.scrapbook_id)
            .map_err(|_| SnapbookError::NotFound("Memory"))?;
        Ok((scrapbook, memory))
    }

    fn owned_photo(&self, user_id: &str, photo_id: &str) -> Result<MemoryPhoto, SnapbookError> {
        let photo = self
            .db_manager
            .get_photo(photo_id)?
            .ok_or(SnapbookError::NotFound("Photo"))?;
        self.owned_memory(user_id, &photo.memory_id)
            .map_err(|_| SnapbookError::NotFound("Photo"))?;
        Ok(photo)
    }

    fn with_public_url(&self, mut photo: MemoryPhoto) -> MemoryPhoto {
        photo.public_url = Some(self.photo_store.public_url(&photo.storage_path));
        photo
    }

    fn with_public_urls(&self, mut memory: Memory) -> Memory {
        memory.photos = memory
            .photos
            .into_iter()
            .map(|photo| self.with_public_url(photo))
            .collect();
        memory
    }

    fn ordered_memories(&self, scrapbook_id: &str) -> Result<Vec<Memory>, SnapbookError> {
        let mut memories = self.db_manager.get_memories_for_scrapbook(scrapbook_id)?;
        memory_order::sort_for_display(&mut memories);
        Ok(memories)
    }

    fn remove_objects(&self, storage_paths: &[String]) {
        if storage_paths.is_empty() {
            return;
        }
        if let Err(error) = self.photo_store.remove(storage_paths) {
            warn!(
                "Some photo objects were not removed ({} requested): {}",
                storage_paths.len(),
                error
            );
        }
    }

    pub fn create_scrapbook(
        &self,
        user_id: &str,
        name_a: &str,
        name_b: &str,
    ) -> Result<Scrapbook, SnapbookError> {
        let (title, name_a, name_b) = validated_names(name_a, name_b)?;
        let scrapbook = Scrapbook {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            name_a,
            name_b,
            share_token: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        self.db_manager.insert_scrapbook(&scrapbook)?;
        info!("Created scrapbook {} ({})", scrapbook.title, scrapbook.id);
        Ok(scrapbook)
    }

    pub fn list_scrapbooks(&self, user_id: &str) -> Result<Vec<Scrapbook>, SnapbookError> {
        Ok(self.db_manager.get_scrapbooks_for_user(user_id)?)
    }

    pub fn scrapbook_detail(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<ScrapbookDetail, SnapbookError> {
        let scrapbook = self.owned_scrapbook(user_id, id)?;
        let memories = self
            .ordered_memories(&scrapbook.id)?
            .into_iter()
            .map(|memory| self.with_public_urls(memory))
            .collect();
        Ok(ScrapbookDetail {
            scrapbook,
            memories,
        })
    }

    pub fn rename_scrapbook(
        &self,
        user_id: &str,
        id: &str,
        name_a: &str,
        name_b: &str,
    ) -> Result<Scrapbook, SnapbookError> {
        let mut scrapbook = self.owned_scrapbook(user_id, id)?;
        let (title, name_a, name_b) = validated_names(name_a, name_b)?;
        self.db_manager
            .update_scrapbook_names(&scrapbook.id, &title, &name_a, &name_b)?;
        scrapbook.title = title;
        scrapbook.name_a = name_a;
        scrapbook.name_b = name_b;
        Ok(scrapbook)
    }

    pub fn delete_scrapbook(&self, user_id: &str, id: &str) -> Result<(), SnapbookError> {
        let scrapbook = self.owned_scrapbook(user_id, id)?;
        let storage_paths = self
            .db_manager
            .get_storage_paths_for_scrapbook(&scrapbook.id)?;
        self.remove_objects(&storage_paths);
        self.db_manager.delete_scrapbook(&scrapbook.id)?;
        info!(
            "Deleted scrapbook {} with {} photos",
            scrapbook.id,
            storage_paths.len()
        );
        Ok(())
    }

    /// Issues a fresh share token; links built on the old one stop resolving.
    pub fn rotate_share_token(&self, user_id: &str, id: &str) -> Result<Scrapbook, SnapbookError> {
        let mut scrapbook = self.owned_scrapbook(user_id, id)?;
        let share_token = Uuid::new_v4().to_string();
        self.db_manager.set_share_token(&scrapbook.id, &share_token)?;
        scrapbook.share_token = share_token;
        info!("Rotated share token for scrapbook {}", scrapbook.id);
        Ok(scrapbook)
    }

    pub fn add_memory(
        &self,
        user_id: &str,
        scrapbook_id: &str,
        kind: MemoryKind,
        position: InsertPosition,
    ) -> Result<Memory, SnapbookError> {
        let scrapbook = self.owned_scrapbook(user_id, scrapbook_id)?;
        let existing = self.db_manager.get_sort_orders(&scrapbook.id)?;
        let sort_order = memory_order::insertion_sort_order(existing, position);

        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            scrapbook_id: scrapbook.id,
            kind,
            date: None,
            note: String::new(),
            song_title: None,
            song_artist: None,
            song_url: None,
            song_album_art_url: None,
            sort_order,
            created_at: Utc::now(),
            photos: Vec::new(),
        };
        self.db_manager.insert_memory(&memory)?;
        debug!(
            "ScrapbookManager: Added {} memory {} at {:?} (sort_order={})",
            kind.as_str(),
            memory.id,
            position,
            sort_order
        );
        Ok(memory)
    }

    pub fn update_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        update: &MemoryUpdate,
    ) -> Result<Memory, SnapbookError> {
        let (_, memory) = self.owned_memory(user_id, memory_id)?;
        let date = match &update.date {
            None => memory.date,
            Some(value) => parse_memory_date(value.as_deref())?,
        };
        let fields = MemoryFields {
            date,
            note: update.note.as_deref().unwrap_or(&memory.note),
            song_title: merged(&update.song_title, &memory.song_title),
            song_artist: merged(&update.song_artist, &memory.song_artist),
            song_url: merged(&update.song_url, &memory.song_url),
            song_album_art_url: merged(&update.song_album_art_url, &memory.song_album_art_url),
        };
        self.db_manager.update_memory_fields(&memory.id, &fields)?;

        let updated = self
            .db_manager
            .get_memory(&memory.id)?
            .ok_or(SnapbookError::NotFound("Memory"))?;
        Ok(self.with_public_urls(updated))
    }

    /// Photo objects go first; a failed object removal is logged and the row is deleted anyway.
    pub fn delete_memory(&self, user_id: &str, memory_id: &str) -> Result<(), SnapbookError> {
        let (_, memory) = self.owned_memory(user_id, memory_id)?;
        let storage_paths: Vec<String> = memory
            .photos
            .iter()
            .map(|photo| photo.storage_path.clone())
            .collect();
        self.remove_objects(&storage_paths);
        self.db_manager.delete_memory(&memory.id)?;
        info!("Deleted memory {}", memory.id);
        Ok(())
    }

    /// Swaps the memory at display `index` with its neighbour and persists dense keys 1..N.
    /// Moving past either end returns the current order unchanged.
    pub fn move_memory(
        &mut self,
        user_id: &str,
        scrapbook_id: &str,
        index: usize,
        direction: MoveDirection,
    ) -> Result<Vec<Memory>, SnapbookError> {
        let scrapbook = self.owned_scrapbook(user_id, scrapbook_id)?;
        let mut memories = self.ordered_memories(&scrapbook.id)?;

        if memory_order::move_adjacent(&mut memories, index, direction) {
            debug!(
                "ScrapbookManager: Moved memory at {} {:?} in scrapbook {}",
                index, direction, scrapbook.id
            );
            let orders: Vec<(String, i64)> = memories
                .iter()
                .map(|memory| (memory.id.clone(), memory.sort_order))
                .collect();
            self.db_manager.update_sort_orders(&orders)?;
        } else {
            debug!(
                "ScrapbookManager: Ignored move of {} {:?} ({} memories)",
                index,
                direction,
                memories.len()
            );
        }

        Ok(memories
            .into_iter()
            .map(|memory| self.with_public_urls(memory))
            .collect())
    }

    /// Stores each image in the batch on its own. Non-images are skipped, and a file
    /// that fails conversion or storage is reported without stopping the others.
    pub fn upload_photos(
        &self,
        user_id: &str,
        memory_id: &str,
        files: Vec<UploadFile>,
    ) -> Result<UploadReport, SnapbookError> {
        let (scrapbook, memory) = self.owned_memory(user_id, memory_id)?;
        let mut report = UploadReport::default();

        for file in files {
            let file_name = file.file_name.clone();
            if !image_pipeline::is_image_upload(&file.content_type, &file.file_name) {
                debug!("Skipping non-image upload {} ({})", file_name, file.content_type);
                report.skipped.push(file_name);
                continue;
            }

            if let Err(error) = image_pipeline::check_size(file.bytes.len(), self.max_upload_bytes)
            {
                warn!("Rejected upload {}: {}", file_name, error);
                report.failed.push(UploadFailure {
                    file_name,
                    reason: error.to_string(),
                });
                continue;
            }

            let is_heic = image_pipeline::is_heic(&file.content_type, &file.file_name);
            let prepared = match image_pipeline::prepare_upload(file, self.jpeg_quality) {
                Ok(prepared) => prepared,
                Err(error) => {
                    let reason = conversion_failure_reason(is_heic, &error);
                    warn!("Upload {} failed: {}", file_name, reason);
                    report.failed.push(UploadFailure { file_name, reason });
                    continue;
                }
            };

            let storage_path =
                build_storage_path(user_id, &scrapbook.id, &memory.id, &prepared.extension);
            if let Err(error) = self.photo_store.upload(&storage_path, &prepared.bytes) {
                warn!("Upload {} failed: {}", file_name, error);
                report.failed.push(UploadFailure {
                    file_name,
                    reason: error.to_string(),
                });
                continue;
            }

            let photo = MemoryPhoto {
                id: Uuid::new_v4().to_string(),
                memory_id: memory.id.clone(),
                storage_path,
                caption: None,
                created_at: Utc::now(),
                public_url: None,
            };
            if let Err(error) = self.db_manager.insert_photo(&photo) {
                warn!("Photo record for {} not saved: {}", file_name, error);
                self.remove_objects(std::slice::from_ref(&photo.storage_path));
                report.failed.push(UploadFailure {
                    file_name,
                    reason: "Failed to save photo record".to_string(),
                });
                continue;
            }

            info!(
                "Uploaded {} to memory {}{}",
                file_name,
                memory.id,
                if prepared.converted { " (converted from HEIC)" } else { "" }
            );
            report.uploaded.push(self.with_public_url(photo));
        }

        Ok(report)
    }

    pub fn update_photo_caption(
        &self,
        user_id: &str,
        photo_id: &str,
        caption: Option<&str>,
    ) -> Result<MemoryPhoto, SnapbookError> {
        let mut photo = self.owned_photo(user_id, photo_id)?;
        let caption = non_empty(caption);
        self.db_manager.update_photo_caption(&photo.id, caption)?;
        photo.caption = caption.map(str::to_string);
        Ok(self.with_public_url(photo))
    }

    pub fn delete_photo(&self, user_id: &str, photo_id: &str) -> Result<(), SnapbookError> {
        let photo = self.owned_photo(user_id, photo_id)?;
        self.remove_objects(std::slice::from_ref(&photo.storage_path));
        self.db_manager.delete_photo(&photo.id)?;
        Ok(())
    }

    /// Read-only view behind a share link. Tokens that are not hyphenated UUIDs never hit
    /// the database.
    pub fn shared_scrapbook(&self, token: &str) -> Result<SharedScrapbook, SnapbookError> {
        if !is_share_token(token) {
            return Err(SnapbookError::NotFound("Shared scrapbook"));
        }
        let token = token.to_ascii_lowercase();
        let scrapbook = self
            .db_manager
            .get_scrapbook_by_share_token(&token)?
            .ok_or(SnapbookError::NotFound("Shared scrapbook"))?;

        let memories = self
            .ordered_memories(&scrapbook.id)?
            .into_iter()
            .map(|memory| self.with_public_urls(memory))
            .collect();
        let page = PageMetadata::for_couple(&scrapbook.name_a, &scrapbook.name_b);

        Ok(SharedScrapbook {
            scrapbook: PublicScrapbook {
                id: scrapbook.id,
                title: scrapbook.title,
                name_a: scrapbook.name_a,
                name_b: scrapbook.name_b,
                created_at: scrapbook.created_at,
            },
            memories,
            page,
        })
    }
}

fn conversion_failure_reason(is_heic: bool, error: &ConversionError) -> String {
    if is_heic {
        format!("Failed to convert HEIC: {error}")
    } else {
        error.to_string()
    }
}
