//! # modelstore
//!
//! Metadata-driven object persistence over SQLite.
//!
//! Entity types implement [`Model`] and describe their table once; the
//! [`PersistenceManager`] turns that description into DDL, compiles CRUD
//! statements, materializes rows as [`Record`]s and notifies change
//! handlers.
//!
//! ```no_run
//! use modelstore::{ColumnType, Criteria, EntityDescriptor, Model, PersistenceManager};
//!
//! struct Album;
//!
//! impl Model for Album {
//!     const TYPE_NAME: &'static str = "Album";
//!
//!     fn describe() -> EntityDescriptor {
//!         EntityDescriptor::new("albums")
//!             .column("ID", ColumnType::Int64)
//!             .column("TITLE", ColumnType::String)
//!     }
//! }
//!
//! # fn main() -> modelstore::Result<()> {
//! let mut manager = PersistenceManager::with_identifier("music");
//! manager.open_database("music.sqlite")?;
//! manager.create_table_if_necessary::<Album>()?;
//! manager.insert::<Album, _, _, _>([("title", "Blue Train")])?;
//! let found = manager.fetch_one::<Album>(&Criteria::new().equals("title", "Blue Train"))?;
//! assert!(found.is_some());
//! # Ok(())
//! # }
//! ```

pub mod bitfield;
pub mod config;
pub mod criteria;
pub mod error;
pub mod handlers;
pub mod metadata;
pub mod naming;
pub mod record;
pub mod registry;
pub mod thread_check;
pub mod value;

#[cfg(feature = "sqlite")]
pub mod manager;
#[cfg(feature = "sqlite")]
pub mod shared;
#[cfg(feature = "sqlite")]
pub mod sql_value;
#[cfg(feature = "sqlite")]
pub mod statement;

pub use bitfield::{is_bit_set, set_bit, BitFieldMapping};
pub use config::ManagerConfig;
pub use criteria::{Criteria, Criterion, NOT_PREFIX};
pub use error::{PersistError, Result};
pub use handlers::{ChangeEvent, ChangeHandler, ChangeRegistry};
pub use metadata::{ColumnDef, EntityDescriptor, EntityMetadata, Model, VirtualFlag};
pub use naming::{convert_column_name_to_key, convert_key_to_column_name};
pub use record::Record;
pub use registry::MetadataRegistry;
pub use thread_check::{ConcurrencyAdvisory, SerialQueue, ThreadMonitor};
pub use value::{smart_quote, smart_quote_value, ColumnType, Value};

#[cfg(feature = "sqlite")]
pub use manager::PersistenceManager;
#[cfg(feature = "sqlite")]
pub use shared::{set_shared_instance, shared_instance};
#[cfg(feature = "sqlite")]
pub use statement::CompiledStatement;
