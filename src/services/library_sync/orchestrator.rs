use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::instrument;

use crate::ports::music_service::MusicServiceClient;
use crate::ports::transliterate::Transliterator;
use crate::services::users::UserIdentity;

use super::catalog::{CatalogError, PlaylistCatalog};
use super::layout::{DestinationResolver, FilesystemLayout};
use super::scheduler::{DownloadPolicy, DownloadScheduler, DownloadStatus, ScheduleReport};

/// A track that could not be downloaded, with enough context to look into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTrack {
    pub playlist: String,
    pub track: String,
    pub path: Option<PathBuf>,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub playlists_processed: usize,
    pub playlists_failed: usize,
    pub tracks_succeeded: usize,
    pub tracks_skipped: usize,
    pub tracks_failed: usize,
    pub tracks_cancelled: usize,
    pub title_collisions: usize,
    /// Downloaded tracks per bitrate (kbps)
    pub downloaded_by_bitrate: BTreeMap<u32, usize>,
    pub failed_tracks: Vec<FailedTrack>,
}

impl SyncSummary {
    fn from_report(report: &ScheduleReport, title_collisions: usize) -> Self {
        let mut summary = SyncSummary {
            title_collisions,
            ..Default::default()
        };

        for playlist in &report.playlists {
            if let Some(failure) = &playlist.failure {
                tracing::warn!("Playlist '{}' was not synced: {}", playlist.title, failure);
                summary.playlists_failed += 1;
            } else {
                summary.playlists_processed += 1;
            }

            for outcome in &playlist.outcomes {
                match outcome.status {
                    DownloadStatus::Succeeded => summary.tracks_succeeded += 1,
                    DownloadStatus::Skipped => summary.tracks_skipped += 1,
                    DownloadStatus::FailedRecoverable | DownloadStatus::FailedFatal => {
                        summary.tracks_failed += 1
                    }
                    DownloadStatus::Cancelled => summary.tracks_cancelled += 1,
                }

                if let Some(bitrate) = outcome.bitrate_used {
                    *summary.downloaded_by_bitrate.entry(bitrate).or_default() += 1;
                }
                if let Some(error) = &outcome.error {
                    summary.failed_tracks.push(FailedTrack {
                        playlist: playlist.title.clone(),
                        track: outcome.track.to_string(),
                        path: outcome.path.clone(),
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                }
            }
        }

        summary
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to prepare directory {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    UpstreamUnavailable(#[from] CatalogError),
    #[error(
        "Session is unauthorized; sync stopped after {} playlists",
        summary.playlists_processed + summary.playlists_failed
    )]
    Unauthorized { summary: SyncSummary },
}

/// Sequences layout preparation, catalog fetch and scheduled download for one user.
pub struct SyncOrchestrator<C: MusicServiceClient + ?Sized> {
    client: Arc<C>,
    transliterator: Arc<dyn Transliterator>,
    layout: FilesystemLayout,
    policy: DownloadPolicy,
}

impl<C: MusicServiceClient + ?Sized> SyncOrchestrator<C> {
    pub fn new(
        client: Arc<C>,
        transliterator: Arc<dyn Transliterator>,
        layout: FilesystemLayout,
        policy: DownloadPolicy,
    ) -> Self {
        Self {
            client,
            transliterator,
            layout,
            policy,
        }
    }

    #[instrument(skip_all, fields(login = %identity.login, uid = identity.remote_uid))]
    pub async fn sync_user(&self, identity: &UserIdentity) -> Result<SyncSummary, SyncError> {
        tracing::info!(
            "Starting sync for {} into {}",
            identity.login,
            self.layout.music_root().display()
        );

        let user_root =
            self.layout
                .ensure_user_tree(identity)
                .await
                .map_err(|source| SyncError::Filesystem {
                    path: self.layout.resolve_user_root(identity),
                    source,
                })?;

        let catalog =
            PlaylistCatalog::build(self.client.as_ref(), self.transliterator.as_ref(), identity)
                .await?;
        tracing::info!(
            "Catalog has {} playlists: {:?}",
            catalog.len(),
            catalog.titles()
        );
        if catalog.is_empty() {
            tracing::info!("Nothing to sync for {}", identity.login);
        }

        let destination = DestinationResolver::new(self.layout.clone(), user_root);
        for playlist in catalog.playlists() {
            // A failure here is reported again, per playlist, by the scheduler
            if let Err(error) = destination.prepare_playlist_dir(&playlist.title).await {
                tracing::warn!(
                    "Failed to create directory for playlist '{}': {}",
                    playlist.title,
                    error
                );
            }
        }

        let scheduler = DownloadScheduler::new(self.client.clone(), self.policy.clone());
        let report = scheduler.run(&catalog, &destination).await;
        let summary = SyncSummary::from_report(&report, catalog.collisions().len());

        if report.aborted {
            tracing::error!("Sync for {} aborted: {:?}", identity.login, summary);
            return Err(SyncError::Unauthorized { summary });
        }

        tracing::info!("Sync for {} finished: {:?}", identity.login, summary);
        Ok(summary)
    }
}
