//! cow-fleet: dynamic iSCSI session enumeration, the snapshot lifecycle
//! cleaner (C14), and the push-to-fleet rolling reboot (C13).

pub mod cleaner;
pub mod push;
pub mod sessions;
pub mod snapshots;

pub use cleaner::{clean_snapshot, clean_snapshots};
pub use push::push_to_fleet;
pub use sessions::dynamic_sessions;
pub use snapshots::list_promoted_snapshots;
