//! HTTP routes for the editor, the share page, song lookups, and photo objects.
//!
//! Handlers stay thin: they resolve the caller, parse the request, and hand the
//! blocking work (SQLite, file I/O, image codecs, upstream HTTP) to
//! `spawn_blocking`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use log::{debug, info};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::SnapbookError,
    image_pipeline,
    protocol::{
        InsertPosition, Memory, MemoryKind, MemoryPhoto, MemoryUpdate, MoveDirection, Scrapbook,
        ScrapbookDetail, SharedScrapbook, SongMetadata, UploadFile, UploadReport,
    },
    scrapbook_manager::ScrapbookManager,
    song_enrichment::SongEnricher,
};

/// Photos sent in one batch request, on top of the per-file limit.
const MAX_FILES_PER_BATCH: usize = 10;
/// Room for multipart framing around the file bytes.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    manager: Arc<Mutex<ScrapbookManager>>,
    enricher: Arc<SongEnricher>,
    user_header: String,
    max_upload_bytes: usize,
    jpeg_quality: u8,
}

impl AppState {
    pub fn new(
        manager: ScrapbookManager,
        enricher: SongEnricher,
        user_header: &str,
        max_upload_bytes: usize,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            enricher: Arc::new(enricher),
            user_header: user_header.to_ascii_lowercase(),
            max_upload_bytes,
            jpeg_quality,
        }
    }

    /// Runs `job` against the manager on the blocking pool.
    async fn with_manager<T, F>(&self, job: F) -> Result<T, SnapbookError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ScrapbookManager) -> Result<T, SnapbookError> + Send + 'static,
    {
        let manager = Arc::clone(&self.manager);
        tokio::task::spawn_blocking(move || {
            let mut manager = manager
                .lock()
                .map_err(|_| SnapbookError::Task("scrapbook manager lock poisoned".to_string()))?;
            job(&mut manager)
        })
        .await
        .map_err(|error| SnapbookError::Task(error.to_string()))?
    }

    /// Caller id from the identity header set by the auth proxy.
    fn caller_id(&self, headers: &HeaderMap) -> Result<String, SnapbookError> {
        headers
            .get(self.user_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(SnapbookError::Unauthenticated)
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct ScrapbookNames {
    #[serde(default)]
    pub name_a: String,
    #[serde(default)]
    pub name_b: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct NewMemoryRequest {
    #[serde(default)]
    pub kind: MemoryKind,
    #[serde(default)]
    pub position: InsertPosition,
}

#[derive(Debug, serde::Deserialize)]
pub struct MoveMemoryRequest {
    pub index: usize,
    pub direction: MoveDirection,
}

#[derive(Debug, serde::Deserialize)]
pub struct CaptionRequest {
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct SongLookupQuery {
    #[serde(default)]
    pub url: String,
}

pub fn router(state: AppState) -> Router {
    let batch_limit = state.max_upload_bytes * MAX_FILES_PER_BATCH + MULTIPART_OVERHEAD_BYTES;
    // Oversized single files must reach the handler to get the sized 413 message.
    let convert_limit = state.max_upload_bytes * 2 + MULTIPART_OVERHEAD_BYTES;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/scrapbooks", get(list_scrapbooks).post(create_scrapbook))
        .route(
            "/api/scrapbooks/{id}",
            get(get_scrapbook)
                .patch(rename_scrapbook)
                .delete(delete_scrapbook),
        )
        .route("/api/scrapbooks/{id}/share", post(rotate_share_token))
        .route("/api/scrapbooks/{id}/memories", post(add_memory))
        .route("/api/scrapbooks/{id}/memories/move", post(move_memory))
        .route(
            "/api/memories/{id}",
            patch(update_memory).delete(delete_memory),
        )
        .route(
            "/api/memories/{id}/photos",
            post(upload_photos).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route(
            "/api/photos/{id}",
            patch(update_photo_caption).delete(delete_photo),
        )
        .route(
            "/api/convert-heic",
            post(convert_heic).layer(DefaultBodyLimit::max(convert_limit)),
        )
        .route("/api/spotify-oembed", get(lookup_song))
        .route("/api/share/{token}", get(shared_scrapbook))
        .route("/storage/{bucket}/{*path}", get(storage_object))
        .layer(cors)
        .with_state(state)
}

async fn list_scrapbooks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Scrapbook>>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let scrapbooks = state
        .with_manager(move |manager| manager.list_scrapbooks(&user_id))
        .await?;
    Ok(Json(scrapbooks))
}

async fn create_scrapbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScrapbookNames>,
) -> Result<(StatusCode, Json<Scrapbook>), SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let scrapbook = state
        .with_manager(move |manager| {
            manager.create_scrapbook(&user_id, &body.name_a, &body.name_b)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(scrapbook)))
}

async fn get_scrapbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ScrapbookDetail>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let detail = state
        .with_manager(move |manager| manager.scrapbook_detail(&user_id, &id))
        .await?;
    Ok(Json(detail))
}

async fn rename_scrapbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ScrapbookNames>,
) -> Result<Json<Scrapbook>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let scrapbook = state
        .with_manager(move |manager| {
            manager.rename_scrapbook(&user_id, &id, &body.name_a, &body.name_b)
        })
        .await?;
    Ok(Json(scrapbook))
}

async fn delete_scrapbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    state
        .with_manager(move |manager| manager.delete_scrapbook(&user_id, &id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rotate_share_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Scrapbook>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let scrapbook = state
        .with_manager(move |manager| manager.rotate_share_token(&user_id, &id))
        .await?;
    Ok(Json(scrapbook))
}

async fn add_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<NewMemoryRequest>,
) -> Result<(StatusCode, Json<Memory>), SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let memory = state
        .with_manager(move |manager| {
            manager.add_memory(&user_id, &id, body.kind, body.position)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(memory)))
}

async fn move_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<MoveMemoryRequest>,
) -> Result<Json<Vec<Memory>>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let memories = state
        .with_manager(move |manager| {
            manager.move_memory(&user_id, &id, body.index, body.direction)
        })
        .await?;
    Ok(Json(memories))
}

async fn update_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<MemoryUpdate>,
) -> Result<Json<Memory>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let memory = state
        .with_manager(move |manager| manager.update_memory(&user_id, &id, &body))
        .await?;
    Ok(Json(memory))
}

async fn delete_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    state
        .with_manager(move |manager| manager.delete_memory(&user_id, &id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn multipart_error(error: MultipartError) -> SnapbookError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return SnapbookError::RequestTooLarge;
    }
    SnapbookError::Validation(format!("Failed to read multipart body: {}", error.body_text()))
}

async fn read_upload(field: Field<'_>) -> Result<Option<UploadFile>, SnapbookError> {
    let Some(file_name) = field.file_name().map(str::to_string) else {
        return Ok(None);
    };
    let content_type = field.content_type().unwrap_or_default().to_string();
    let bytes = field.bytes().await.map_err(multipart_error)?;
    Ok(Some(UploadFile {
        file_name,
        content_type,
        bytes: bytes.to_vec(),
    }))
}

/// Every file part counts regardless of its field name; plain text parts are ignored.
async fn upload_photos(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadReport>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if let Some(file) = read_upload(field).await? {
            files.push(file);
        }
    }
    debug!("Received {} files for memory {}", files.len(), id);

    let report = state
        .with_manager(move |manager| manager.upload_photos(&user_id, &id, files))
        .await?;
    Ok(Json(report))
}

async fn update_photo_caption(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CaptionRequest>,
) -> Result<Json<MemoryPhoto>, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    let photo = state
        .with_manager(move |manager| {
            manager.update_photo_caption(&user_id, &id, body.caption.as_deref())
        })
        .await?;
    Ok(Json(photo))
}

async fn delete_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, SnapbookError> {
    let user_id = state.caller_id(&headers)?;
    state
        .with_manager(move |manager| manager.delete_photo(&user_id, &id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Converts the multipart `file` part to JPEG and returns the bytes.
async fn convert_heic(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, SnapbookError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            upload = read_upload(field).await?;
            break;
        }
    }
    let upload = upload.ok_or_else(|| SnapbookError::Validation("No file provided".to_string()))?;
    image_pipeline::check_size(upload.bytes.len(), state.max_upload_bytes)?;

    let quality = state.jpeg_quality;
    let file_name = upload.file_name.clone();
    let jpeg = tokio::task::spawn_blocking(move || {
        image_pipeline::convert_heic_to_jpeg(&upload.bytes, quality)
    })
    .await
    .map_err(|error| SnapbookError::Task(error.to_string()))??;
    info!("Converted {} to JPEG ({} bytes)", file_name, jpeg.len());

    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))],
        Bytes::from(jpeg),
    ))
}

async fn lookup_song(
    State(state): State<AppState>,
    Query(query): Query<SongLookupQuery>,
) -> Result<Json<SongMetadata>, SnapbookError> {
    let enricher = Arc::clone(&state.enricher);
    let metadata = tokio::task::spawn_blocking(move || enricher.lookup(&query.url))
        .await
        .map_err(|error| SnapbookError::Task(error.to_string()))??;
    Ok(Json(metadata))
}

async fn shared_scrapbook(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SharedScrapbook>, SnapbookError> {
    let shared = state
        .with_manager(move |manager| manager.shared_scrapbook(&token))
        .await?;
    Ok(Json(shared))
}

fn content_type_for(storage_path: &str) -> &'static str {
    match image_pipeline::file_extension(storage_path).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "application/octet-stream",
    }
}

async fn storage_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, SnapbookError> {
    let content_type = content_type_for(&path);
    let bytes = state
        .with_manager(move |manager| {
            let store = manager.photo_store();
            if bucket != store.bucket() {
                return Err(SnapbookError::NotFound("Bucket"));
            }
            Ok(store.read(&path)?)
        })
        .await?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static(content_type))],
        Bytes::from(bytes),
    ))
}

/// Binds the listener and serves until Ctrl+C or SIGTERM.
pub async fn serve(address: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!("Snapbook listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", error);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(error) => {
                log::error!("Failed to install terminate handler: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, AppState};
    use crate::{
        config::EnrichmentConfig, db_manager::DbManager, photo_store::PhotoStore,
        scrapbook_manager::ScrapbookManager, song_enrichment::SongEnricher,
    };

    const USER_HEADER: &str = "x-snapbook-user";
    const BOUNDARY: &str = "snapbook-test-boundary";
    const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

    fn app(dir: &tempfile::TempDir) -> Router {
        let db_manager = DbManager::new_in_memory().expect("in-memory db");
        let photo_store = PhotoStore::new(
            dir.path().to_path_buf(),
            "snapbook-photos",
            "http://localhost:3000",
        );
        let manager = ScrapbookManager::new(db_manager, photo_store, 85, MAX_UPLOAD_BYTES);
        let enricher = SongEnricher::new(&EnrichmentConfig {
            oembed_endpoint: "http://127.0.0.1:9/oembed".to_string(),
            ..EnrichmentConfig::default()
        });
        router(AppState::new(
            manager,
            enricher,
            USER_HEADER,
            MAX_UPLOAD_BYTES,
            85,
        ))
    }

    fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_request(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::empty()).expect("request")
    }

    /// (field name, file name, content type, bytes) parts.
    fn multipart_request(
        uri: &str,
        user: Option<&str>,
        parts: &[(&str, &str, &str, Vec<u8>)],
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (field, file_name, content_type, bytes) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder().method("POST").uri(uri).header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::from(body)).expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn png_bytes() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([9, 9, 9])));
        let mut out = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("png encode");
        out.into_inner()
    }

    async fn create_book(app: &Router, user: &str) -> Value {
        let (status, body) = send_json(
            app,
            json_request(
                "POST",
                "/api/scrapbooks",
                Some(user),
                json!({"name_a": "Taita", "name_b": "Vienna"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_owner_routes_require_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);

        let (status, body) = send_json(&app, get_request("/api/scrapbooks", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing caller identity");
    }

    #[tokio::test]
    async fn test_scrapbook_lifecycle_and_ownership() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);
        let book = create_book(&app, "alice").await;
        assert_eq!(book["title"], "Taita + Vienna");
        let id = book["id"].as_str().expect("id").to_string();

        let (status, list) = send_json(&app, get_request("/api/scrapbooks", Some("alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().map(Vec::len), Some(1));

        let (status, body) = send_json(
            &app,
            get_request(&format!("/api/scrapbooks/{id}"), Some("mallory")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Scrapbook not found");

        let (status, body) = send_json(
            &app,
            json_request(
                "PATCH",
                &format!("/api/scrapbooks/{id}"),
                Some("alice"),
                json!({"name_a": "Ana", "name_b": ""}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Both names are required");

        let (status, _) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/scrapbooks/{id}"))
                .header(USER_HEADER, "alice")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_add_and_move_memories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);
        let book = create_book(&app, "alice").await;
        let id = book["id"].as_str().expect("id").to_string();
        let memories_uri = format!("/api/scrapbooks/{id}/memories");

        let (status, first) = send_json(
            &app,
            json_request("POST", &memories_uri, Some("alice"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["type"], "note");
        assert_eq!(first["sort_order"], -1);

        let (_, song) = send_json(
            &app,
            json_request(
                "POST",
                &memories_uri,
                Some("alice"),
                json!({"kind": "song", "position": "bottom"}),
            ),
        )
        .await;
        assert_eq!(song["sort_order"], 1);

        let (status, moved) = send_json(
            &app,
            json_request(
                "POST",
                &format!("{memories_uri}/move"),
                Some("alice"),
                json!({"index": 1, "direction": "up"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved[0]["id"], song["id"]);
        assert_eq!(moved[0]["sort_order"], 1);
        assert_eq!(moved[1]["sort_order"], 2);

        let (status, unchanged) = send_json(
            &app,
            json_request(
                "POST",
                &format!("{memories_uri}/move"),
                Some("alice"),
                json!({"index": 1, "direction": "down"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unchanged, moved);
    }

    #[tokio::test]
    async fn test_shared_view_hides_owner_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);
        let book = create_book(&app, "alice").await;
        let token = book["share_token"].as_str().expect("token").to_string();

        let (status, shared) =
            send_json(&app, get_request(&format!("/api/share/{token}"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shared["page"]["title"], "Taita & Vienna — Snapbook");
        assert_eq!(
            shared["page"]["description"],
            "A love story between Taita and Vienna"
        );
        assert!(shared["scrapbook"].get("user_id").is_none());

        let (status, _) = send_json(&app, get_request("/api/share/not-a-token", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_song_lookup_rejects_non_track_urls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);

        let (status, body) = send_json(
            &app,
            get_request(
                "/api/spotify-oembed?url=https%3A%2F%2Fexample.com%2Fsong",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid Spotify track URL");

        let (status, _) = send_json(&app, get_request("/api/spotify-oembed", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_convert_heic_validates_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);

        let (status, body) = send_json(
            &app,
            multipart_request(
                "/api/convert-heic",
                None,
                &[("other", "a.heic", "image/heic", b"x".to_vec())],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file provided");

        let (status, body) = send_json(
            &app,
            multipart_request(
                "/api/convert-heic",
                None,
                &[(
                    "file",
                    "big.heic",
                    "image/heic",
                    vec![0u8; MAX_UPLOAD_BYTES + MAX_UPLOAD_BYTES / 2],
                )],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "File too large (2MB). Maximum is 1MB.");

        let (status, body) = send_json(
            &app,
            multipart_request(
                "/api/convert-heic",
                None,
                &[("file", "broken.heic", "image/heic", b"broken".to_vec())],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().is_some_and(|message| !message.is_empty()));
    }

    #[tokio::test]
    async fn test_photo_upload_is_served_from_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(&dir);
        let book = create_book(&app, "alice").await;
        let id = book["id"].as_str().expect("id").to_string();
        let (_, memory) = send_json(
            &app,
            json_request(
                "POST",
                &format!("/api/scrapbooks/{id}/memories"),
                Some("alice"),
                json!({"kind": "note"}),
            ),
        )
        .await;
        let memory_id = memory["id"].as_str().expect("memory id").to_string();

        let png = png_bytes();
        let (status, report) = send_json(
            &app,
            multipart_request(
                &format!("/api/memories/{memory_id}/photos"),
                Some("alice"),
                &[
                    ("photos", "beach.png", "image/png", png.clone()),
                    ("photos", "readme.txt", "text/plain", b"hi".to_vec()),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["skipped"], json!(["readme.txt"]));
        let public_url = report["uploaded"][0]["public_url"]
            .as_str()
            .expect("public url")
            .to_string();
        let object_uri = public_url
            .strip_prefix("http://localhost:3000")
            .expect("configured base url")
            .to_string();

        let response = app
            .clone()
            .oneshot(get_request(&object_uri, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
        let served = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        assert_eq!(served.to_vec(), png);

        let (status, _) = send(
            &app,
            get_request("/storage/other-bucket/alice/x.png", None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
