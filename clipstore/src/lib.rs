pub mod config;
pub mod control;
pub mod entry;
pub mod error;
pub mod growth;
pub mod identity;
pub mod idgen;
pub mod index;
pub mod interrupt;
pub mod readiness;
pub mod session;
pub mod shard;
pub mod store;
pub mod subscribers;
pub mod transfer;

// Re-export the store surface for convenience
pub use store::{EntryStats, ShutdownReport, Store};

// Re-export session types for convenience
pub use session::{OpenOptions, Session};

pub use config::StoreConfig;
pub use control::Command;
pub use error::{ConfigError, Result, StoreError};
pub use identity::Identity;
pub use interrupt::Interrupter;
pub use readiness::PollMask;
pub use shard::LockDiscipline;
pub use subscribers::Notification;
pub use transfer::{ByteSink, ByteSource, TransferFault, Vectored, VectoredMut};
