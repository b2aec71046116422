mod config;
mod db_manager;
mod error;
mod http_api;
mod image_pipeline;
mod memory_order;
mod photo_store;
mod protocol;
mod scrapbook_manager;
mod song_enrichment;

use std::net::SocketAddr;

use db_manager::DbManager;
use http_api::AppState;
use log::{info, warn};
use photo_store::PhotoStore;
use scrapbook_manager::ScrapbookManager;
use song_enrichment::SongEnricher;

fn init_logging() {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        clog.parse_filters(&filters);
    }
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    if !cfg!(feature = "heic") {
        warn!("Built without the heic feature; HEIC uploads will be rejected (see `cargo build-heic`)");
    }

    let config_file = config::config_file_path();
    let config = config::load_or_create(&config_file)?;
    info!("Loaded config from {}", config_file.display());

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let bucket_dir = config.bucket_dir();
    std::fs::create_dir_all(&bucket_dir)?;
    info!(
        "Data directory {} (bucket {})",
        data_dir.display(),
        config.storage.bucket
    );

    let db_manager = DbManager::new(&config.database_path())?;
    let photo_store = PhotoStore::new(
        bucket_dir,
        &config.storage.bucket,
        &config.server.public_base_url,
    );
    let manager = ScrapbookManager::new(
        db_manager,
        photo_store,
        config.uploads.jpeg_quality,
        config.max_upload_bytes(),
    );
    let enricher = SongEnricher::new(&config.enrichment);

    let state = AppState::new(
        manager,
        enricher,
        &config.auth.user_header,
        config.max_upload_bytes(),
        config.uploads.jpeg_quality,
    );

    let address: SocketAddr =
        format!("{}:{}", config.server.bind_address, config.server.port).parse()?;
    http_api::serve(&address.to_string(), state).await?;
    Ok(())
}
