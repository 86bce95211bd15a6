//! Mirrors a user's favorites and playlists from the music service into a
//! local directory tree.
//!
//! [`SyncOrchestrator`] drives one run: it prepares the [`FilesystemLayout`],
//! builds a [`catalog::PlaylistCatalog`] and hands it to a
//! [`scheduler::DownloadScheduler`], which downloads tracks in bounded batches.

pub mod catalog;
pub mod layout;
pub mod orchestrator;
pub mod scheduler;

pub use layout::FilesystemLayout;
pub use orchestrator::{SyncError, SyncOrchestrator, SyncSummary};
pub use scheduler::DownloadPolicy;
