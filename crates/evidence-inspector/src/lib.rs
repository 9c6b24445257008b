//! Post-session correlation pass. Reads the whole evidence log back once,
//! reconciles it against the live browser state captured at session end
//! (cookie jar, local-storage snapshots), attributes persisted state to
//! the code locations that created it, and assembles the classified output
//! tables. Runs strictly after browsing; every step is idempotent and
//! reads its inputs without shared cursors.

pub mod inspector;
pub mod model;

pub use inspector::{InspectError, Inspector};
pub use model::{Beacon, BeaconLog, Cookie, LocalStorageMap, StorageEntry};
