//! # hfw-session
//!
//! Session liveness for HFW: several tabs of one browser session agree,
//! through shared storage alone, on how many tabs are open, which are
//! active, and which single tab asks the user "are you still there?" once
//! everybody has gone idle.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. A driver calls
//!   [`TimeoutCoordinator::pump`]; time comes from a [`Clock`].
//! - **Atomic shared updates**: Every read-modify-write of shared state runs
//!   inside [`SharedStore::update`]. Tab membership is a set, counters are derived.
//! - **Graceful degradation**: Corrupt or missing shared files read as an
//!   empty session; a modal that cannot be shown means logout.
//! - **Substitutable storage**: [`MemorySharedStore`] for one process,
//!   [`FileSharedStore`] across processes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hfw_session::*;
//!
//! let (modal, events) = ChannelModalHost::new();
//! let mut tab = TimeoutCoordinator::new(
//!     Arc::new(MemorySharedStore::new()),
//!     TabStorage::new(),
//!     Arc::new(SystemClock),
//!     Box::new(modal),
//!     LivenessConfig::default(),
//! );
//! let logout = tab.subscribe_logout();
//! tab.start_timeout(20, false)?;
//! loop {
//!     tab.pump()?;
//! }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dialog;
pub mod error;
pub mod file_store;
pub mod lifecycle;
pub mod registry;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use coordinator::{CoordinatorState, TimeoutCoordinator};
pub use dialog::{
    ChannelModalHost, DialogPoll, DialogRequest, DialogResponder, DialogResult, ModalEvent,
    ModalHost, TimeoutDialog, DIALOG_TIMEOUT,
};
pub use error::{HfwError, Result};
pub use file_store::FileSharedStore;
pub use lifecycle::{FrameStores, PageLifecycle, SnapInState, UnloadDecision};
pub use registry::{ClaimOutcome, RegisterOutcome, TabRegistry, UnregisterOutcome};
pub use storage::*;
