//! Optional process-wide default manager
//!
//! Set once at startup; later attempts hand the manager back. Nothing in the
//! crate requires it.

use std::sync::{Mutex, OnceLock};

use tracing::info;

use crate::manager::PersistenceManager;

static SHARED: OnceLock<Mutex<PersistenceManager>> = OnceLock::new();

/// Install `manager` as the shared instance. Returns it back if one is
/// already installed.
pub fn set_shared_instance(manager: PersistenceManager) -> Result<(), PersistenceManager> {
    let identifier = manager.identifier().to_string();
    SHARED
        .set(Mutex::new(manager))
        .map_err(|rejected| rejected.into_inner().unwrap_or_else(|e| e.into_inner()))?;
    info!(identifier = %identifier, "Installed shared persistence manager");
    Ok(())
}

pub fn shared_instance() -> Option<&'static Mutex<PersistenceManager>> {
    SHARED.get()
}
