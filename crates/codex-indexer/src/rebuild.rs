//! Index rebuild operations
//!
//! Drops and recreates the index from scratch. Only derived data is lost;
//! the documents themselves are repopulated by a forced sync.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::connection::{IndexDb, IndexError};
use crate::provider::FileProvider;
use crate::schema::{self, ProjectIdentity, CONTENT_TABLES};
use crate::sync::{self, SyncOptions, SyncReport};

/// Drop every content table (children first) and reapply the schema.
///
/// Dropping a table also drops its triggers and indexes.
pub fn nuke_and_recreate(
    conn: &Connection,
    identity: Option<&ProjectIdentity>,
) -> Result<(), IndexError> {
    for table in CONTENT_TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))?;
    }
    schema::init_schema(conn, identity)?;
    warn!(version = schema::SCHEMA_VERSION, "Index tables dropped and recreated");
    Ok(())
}

/// Nuke the index and repopulate it with a forced full sync.
///
/// The owning project recorded in the store is kept.
pub fn rebuild_index(
    db: &mut IndexDb,
    provider: &dyn FileProvider,
) -> Result<SyncReport, IndexError> {
    let identity = match db.identity() {
        Some(identity) => Some(identity.clone()),
        None => schema::read_schema_info(db.connection()?)
            .ok()
            .flatten()
            .and_then(|info| {
                info.project_id.map(|id| ProjectIdentity {
                    id,
                    name: info.project_name,
                })
            }),
    };

    db.write("rebuild_index", |conn| nuke_and_recreate(conn, identity.as_ref()))?;

    let options = SyncOptions {
        force: true,
        ..SyncOptions::default()
    };
    let report = sync::sync_files(db, provider, &options)?;
    info!(
        synced = report.synced_files,
        errors = report.errors.len(),
        "Index rebuilt"
    );
    Ok(report)
}
