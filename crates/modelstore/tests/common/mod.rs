//! Shared models and manager helpers for integration tests

#![allow(dead_code)]

use modelstore::{
    BitFieldMapping, ColumnType, EntityDescriptor, ManagerConfig, Model, PersistenceManager,
};

pub const AUTO_DOWNLOAD: i64 = 1;
pub const WIFI_ONLY: i64 = 2;

/// Lowercase columns, the smallest useful shape.
pub struct Album;

impl Model for Album {
    const TYPE_NAME: &'static str = "Album";

    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("albums")
            .column("ID", ColumnType::Int64)
            .column("title", ColumnType::String)
            .column("flags", ColumnType::Int32)
            .bit_field(
                BitFieldMapping::new("flags")
                    .flag("autoDownload", AUTO_DOWNLOAD)
                    .flag("wifiOnly", WIFI_ONLY),
            )
    }
}

/// Upper-snake columns of every declared type, plus a lazily loaded blob.
pub struct Episode;

impl Model for Episode {
    const TYPE_NAME: &'static str = "Episode";

    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("episodes")
            .column("ID", ColumnType::Int64)
            .column("MEDIA_KEY", ColumnType::String)
            .column("TITLE", ColumnType::String)
            .column("SEASON_NUMBER", ColumnType::Int32)
            .column("DURATION", ColumnType::Float64)
            .column("VOLUME", ColumnType::Float32)
            .column("IS_EXPLICIT", ColumnType::Bool)
            .column("PUB_DATE", ColumnType::Date)
            .column("ARTWORK_DATA", ColumnType::Blob)
            .column("FLAGS", ColumnType::Int64)
            .exclude("ARTWORK_DATA")
            .bit_field(BitFieldMapping::new("flags").flag("played", 1).flag("starred", 4))
    }
}

/// String primary key supplied by the caller.
pub struct Genre;

impl Model for Genre {
    const TYPE_NAME: &'static str = "Genre";

    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("genres")
            .column("CODE", ColumnType::String)
            .column("LABEL", ColumnType::String)
            .primary_key("CODE")
            .primary_key_auto_generated(false)
    }
}

/// First and second revision of one table.
pub struct TrackV1;

impl Model for TrackV1 {
    const TYPE_NAME: &'static str = "TrackV1";

    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("tracks")
            .column("ID", ColumnType::Int64)
            .column("NAME", ColumnType::String)
    }
}

pub struct TrackV2;

impl Model for TrackV2 {
    const TYPE_NAME: &'static str = "TrackV2";

    fn describe() -> EntityDescriptor {
        EntityDescriptor::new("tracks")
            .column("ID", ColumnType::Int64)
            .column("NAME", ColumnType::String)
            .column("PLAY_COUNT", ColumnType::Int32)
            .column("LAST_PLAYED", ColumnType::Date)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modelstore=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory manager with every fixture table created.
pub fn memory_manager() -> PersistenceManager {
    init_tracing();
    let mut manager = PersistenceManager::new(ManagerConfig::with_identifier("tests"));
    manager.open_in_memory().expect("open in-memory database");
    manager.create_table_if_necessary::<Album>().expect("albums");
    manager.create_table_if_necessary::<Episode>().expect("episodes");
    manager.create_table_if_necessary::<Genre>().expect("genres");
    manager
}
