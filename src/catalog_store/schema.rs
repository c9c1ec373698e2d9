//! SQLite schema definitions for the package catalog database.
//!
//! Timestamps used for ordering (`next_crawl`, `queued_at`, `marked_at`) are
//! stored as Unix seconds so they sort natively.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Packages and crawl queue
// =============================================================================

/// Packages table - one row per crawled import path
const PACKAGES_TABLE_V1: Table = Table {
    name: "packages",
    columns: &[
        sqlite_column!("import_path", &SqlType::Text, is_primary_key = true),
        sqlite_column!("project_root", &SqlType::Text, non_null = true),
        sqlite_column!("etag", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("synopsis", &SqlType::Text, non_null = true),
        sqlite_column!("imports", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("next_crawl", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "suppressed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_packages_next_crawl", "next_crawl"),
        ("idx_packages_project_root", "project_root"),
    ],
};

/// New crawl queue - import paths never crawled before
const NEW_CRAWL_QUEUE_TABLE_V1: Table = Table {
    name: "new_crawl_queue",
    columns: &[
        sqlite_column!("import_path", &SqlType::Text, is_primary_key = true),
        sqlite_column!("has_subdirs", &SqlType::Integer, non_null = true),
        sqlite_column!("queued_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_new_crawl_queue_queued_at", "queued_at")],
};

/// Bad crawls - import paths that resolved to nothing
const BAD_CRAWLS_TABLE_V1: Table = Table {
    name: "bad_crawls",
    columns: &[
        sqlite_column!("import_path", &SqlType::Text, is_primary_key = true),
        sqlite_column!("marked_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

// =============================================================================
// Version 2 - Named blobs (feed cursors and similar state)
// =============================================================================

const BLOBS_TABLE_V2: Table = Table {
    name: "blobs",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Blob, non_null = true),
        sqlite_column!(
            "updated_at",
            &SqlType::Text,
            non_null = true,
            default_value = Some("(datetime('now'))")
        ),
    ],
    indices: &[],
};

/// Migration from version 1 to version 2: add blobs table
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    BLOBS_TABLE_V2.create(conn)
}

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            PACKAGES_TABLE_V1,
            NEW_CRAWL_QUEUE_TABLE_V1,
            BAD_CRAWLS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            PACKAGES_TABLE_V1,
            NEW_CRAWL_QUEUE_TABLE_V1,
            BAD_CRAWLS_TABLE_V1,
            BLOBS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
