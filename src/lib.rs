#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Mutual exclusion across processes and machines through object-storage
//! leases.
//!
//! The storage service is the only arbiter: a [`CloudLock`] holds the lock
//! exactly while the service considers its lease live. Guarded reads and
//! writes must carry [`CloudLock::access_condition`] so that a holder whose
//! lease silently lapsed cannot overwrite the next holder's work.

pub mod config;
pub mod error;
pub mod keep_alive;
pub mod lock;
pub mod prelude;
pub mod scope;

mod cli;
pub use cli::{Cli, Commands};

pub use config::{LockConfig, RetryPolicy};
pub use error::{LockError, Result};
pub use keep_alive::{KeepAlive, RenewalStatus};
pub use lock::{CloudLock, LockState};
pub use scope::with_lock;
