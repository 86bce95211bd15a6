use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::instrument;

use crate::ports::music_service::{Codec, DownloadError, MusicServiceClient, ServiceError, TrackRef};

use super::catalog::{PlaylistCatalog, PlaylistHandle, PlaylistTracks};
use super::layout::{DestinationResolver, partial_path};

/// Tracks downloaded concurrently as one unit. Bounds in-flight requests
/// to stay inside the service's fair-use limits.
pub const BATCH_SIZE: usize = 5;

/// Quality tiers and retry timing applied to every track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub codec: Codec,
    /// Tier A
    pub preferred_bitrate: u32,
    /// Tier B
    pub fallback_bitrate: u32,
    /// Pause before the single retry after a timeout.
    pub retry_backoff: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            codec: Codec::Mp3,
            preferred_bitrate: 320,
            fallback_bitrate: 192,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Destination already existed; no transfer was attempted.
    Skipped,
    Succeeded,
    /// Track-scoped failure; siblings and later batches are unaffected.
    FailedRecoverable,
    /// The session is invalid; the run stops.
    FailedFatal,
    /// Dropped from its batch after a sibling failed fatally.
    Cancelled,
}

/// Terminal result for one track in one run.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub track: TrackRef,
    pub status: DownloadStatus,
    pub bitrate_used: Option<u32>,
    pub path: Option<PathBuf>,
    pub error: Option<DownloadError>,
}

impl DownloadOutcome {
    fn skipped(track: TrackRef, path: PathBuf) -> Self {
        Self {
            track,
            status: DownloadStatus::Skipped,
            bitrate_used: None,
            path: Some(path),
            error: None,
        }
    }

    fn succeeded(track: TrackRef, path: PathBuf, bitrate_kbps: u32) -> Self {
        Self {
            track,
            status: DownloadStatus::Succeeded,
            bitrate_used: Some(bitrate_kbps),
            path: Some(path),
            error: None,
        }
    }

    fn failed(track: TrackRef, path: Option<PathBuf>, error: DownloadError) -> Self {
        let status = match error {
            DownloadError::Unauthorized => DownloadStatus::FailedFatal,
            _ => DownloadStatus::FailedRecoverable,
        };
        tracing::warn!(
            track = %track,
            kind = error.kind(),
            "Failed to download track: {}",
            error
        );
        Self {
            track,
            status,
            bitrate_used: None,
            path,
            error: Some(error),
        }
    }

    fn cancelled(track: TrackRef) -> Self {
        Self {
            track,
            status: DownloadStatus::Cancelled,
            bitrate_used: None,
            path: None,
            error: None,
        }
    }
}

/// Why a playlist produced no track outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaylistFailure {
    #[error("Failed to create playlist directory: {0}")]
    Directory(String),
    #[error("Failed to fetch playlist tracks: {0}")]
    Tracks(ServiceError),
}

#[derive(Debug, Clone)]
pub struct PlaylistReport {
    pub title: String,
    pub directory: PathBuf,
    /// In original track order, whatever order the downloads finished in.
    pub outcomes: Vec<DownloadOutcome>,
    pub failure: Option<PlaylistFailure>,
}

impl PlaylistReport {
    pub fn count(&self, status: DownloadStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// The session was rejected while working on this playlist.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.failure,
            Some(PlaylistFailure::Tracks(ServiceError::Unauthorized))
        ) || self
            .outcomes
            .iter()
            .any(|o| o.status == DownloadStatus::FailedFatal)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub playlists: Vec<PlaylistReport>,
    /// Set when a fatal authorization failure stopped the run early.
    pub aborted: bool,
}

/// Destination paths taken by tracks of one playlist, keyed to the position
/// of the track that owns them. Only the owner may transfer into a path.
#[derive(Debug, Default)]
struct PathClaims(Mutex<HashMap<PathBuf, usize>>);

impl PathClaims {
    fn owners(&self) -> MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// False when another track of the playlist already owns `path`.
    fn claim(&self, path: &Path, position: usize) -> bool {
        match self.owners().entry(path.to_path_buf()) {
            Entry::Occupied(owner) => *owner.get() == position,
            Entry::Vacant(slot) => {
                slot.insert(position);
                true
            }
        }
    }

    fn claimed_by(&self, position: usize) -> Option<PathBuf> {
        self.owners()
            .iter()
            .find(|(_, owner)| **owner == position)
            .map(|(path, _)| path.clone())
    }
}

async fn remove_partial(path: &Path) {
    let partial = partial_path(path);
    if let Err(error) = tokio::fs::remove_file(&partial).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            "Failed to remove partial file {}: {}",
            partial.display(),
            error
        );
    }
}

/// Turns a catalog into sequential playlists of sequential batches, each
/// batch downloading up to [`BATCH_SIZE`] tracks concurrently.
pub struct DownloadScheduler<C: MusicServiceClient + ?Sized> {
    client: Arc<C>,
    policy: DownloadPolicy,
}

impl<C: MusicServiceClient + ?Sized> DownloadScheduler<C> {
    pub fn new(client: Arc<C>, policy: DownloadPolicy) -> Self {
        Self { client, policy }
    }

    /// Download every playlist in catalog order. Stops before the next batch
    /// once the session is reported unauthorized.
    #[instrument(skip_all, fields(user_root = %destination.user_root().display()))]
    pub async fn run(
        &self,
        catalog: &PlaylistCatalog,
        destination: &DestinationResolver,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        for playlist in catalog.playlists() {
            let playlist_report = self.download_playlist(playlist, destination).await;
            let fatal = playlist_report.is_fatal();
            report.playlists.push(playlist_report);

            if fatal {
                tracing::error!(
                    "Session is unauthorized, skipping {} remaining playlists",
                    catalog.len() - report.playlists.len()
                );
                report.aborted = true;
                break;
            }
        }

        report
    }

    #[instrument(skip_all, fields(playlist = %playlist.title))]
    pub async fn download_playlist(
        &self,
        playlist: &PlaylistHandle,
        destination: &DestinationResolver,
    ) -> PlaylistReport {
        tracing::info!("Downloading playlist: {}", playlist.title);

        let mut report = PlaylistReport {
            title: playlist.title.clone(),
            directory: destination.playlist_dir(&playlist.title),
            outcomes: Vec::new(),
            failure: None,
        };

        let directory = match destination.prepare_playlist_dir(&playlist.title).await {
            Ok(directory) => directory,
            Err(error) => {
                tracing::error!(
                    "Failed to create directory {}: {}",
                    report.directory.display(),
                    error
                );
                report.failure = Some(PlaylistFailure::Directory(error.to_string()));
                return report;
            }
        };

        let tracks = match self.resolve_tracks(playlist).await {
            Ok(tracks) => tracks,
            Err(error) => {
                tracing::error!(
                    "Failed to fetch tracks of playlist '{}': {}",
                    playlist.title,
                    error
                );
                report.failure = Some(PlaylistFailure::Tracks(error));
                return report;
            }
        };

        let claims = PathClaims::default();
        let batch_count = tracks.len().div_ceil(BATCH_SIZE);
        for (index, batch) in tracks.chunks(BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Batch {}/{} of '{}' ({} tracks)",
                index + 1,
                batch_count,
                playlist.title,
                batch.len()
            );

            let (outcomes, fatal) = self
                .download_batch(batch, index * BATCH_SIZE, &claims, &directory, destination)
                .await;
            report.outcomes.extend(outcomes);

            if fatal {
                break;
            }
        }

        tracing::info!(
            "Finished playlist '{}': {} downloaded, {} skipped, {} failed",
            playlist.title,
            report.count(DownloadStatus::Succeeded),
            report.count(DownloadStatus::Skipped),
            report.count(DownloadStatus::FailedRecoverable)
                + report.count(DownloadStatus::FailedFatal),
        );

        report
    }

    async fn resolve_tracks(
        &self,
        playlist: &PlaylistHandle,
    ) -> Result<Vec<TrackRef>, ServiceError> {
        match &playlist.tracks {
            PlaylistTracks::Resolved(tracks) => Ok(tracks.clone()),
            PlaylistTracks::Deferred(handle) => self.client.fetch_playlist_tracks(handle).await,
        }
    }

    /// Fan out one batch and wait for every slot to be filled. Each future
    /// owns exactly one index, so outcomes land in track order without a lock.
    /// After a fatal outcome the remaining futures are dropped and whatever
    /// they had partially written is removed.
    async fn download_batch(
        &self,
        batch: &[TrackRef],
        offset: usize,
        claims: &PathClaims,
        directory: &Path,
        destination: &DestinationResolver,
    ) -> (Vec<DownloadOutcome>, bool) {
        let mut slots: Vec<Option<DownloadOutcome>> = vec![None; batch.len()];
        let mut fatal = false;

        {
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .enumerate()
                .map(|(index, track)| async move {
                    let outcome = self
                        .download_track(track, offset + index, claims, directory, destination)
                        .await;
                    (index, outcome)
                })
                .collect();

            while let Some((index, outcome)) = in_flight.next().await {
                fatal = outcome.status == DownloadStatus::FailedFatal;
                slots[index] = Some(outcome);
                if fatal {
                    break;
                }
            }
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, (slot, track)) in slots.into_iter().zip(batch).enumerate() {
            let outcome = match slot {
                Some(outcome) => outcome,
                None => {
                    tracing::debug!(track = %track, "Cancelled after fatal failure in batch");
                    if let Some(path) = claims.claimed_by(offset + index) {
                        remove_partial(&path).await;
                    }
                    DownloadOutcome::cancelled(track.clone())
                }
            };
            outcomes.push(outcome);
        }

        (outcomes, fatal)
    }

    /// Per-track procedure: skip if present or owned by an earlier track of
    /// the playlist, else tier A with a single tier B retry for unsupported
    /// quality or a timeout.
    async fn download_track(
        &self,
        track: &TrackRef,
        position: usize,
        claims: &PathClaims,
        directory: &Path,
        destination: &DestinationResolver,
    ) -> DownloadOutcome {
        let metadata = match self.client.fetch_track(track).await {
            Ok(metadata) => metadata,
            Err(error) => return DownloadOutcome::failed(track.clone(), None, error.into()),
        };
        let path = destination.track_path(directory, &metadata);

        if !claims.claim(&path, position) {
            tracing::debug!(
                track = %track,
                "Same destination as an earlier track: {}",
                path.display()
            );
            return DownloadOutcome::skipped(track.clone(), path);
        }

        match tokio::fs::try_exists(&path).await {
            Ok(true) => {
                tracing::debug!(track = %track, "Already downloaded: {}", path.display());
                return DownloadOutcome::skipped(track.clone(), path);
            }
            Ok(false) => {}
            Err(error) => {
                return DownloadOutcome::failed(
                    track.clone(),
                    Some(path),
                    DownloadError::Other(error.to_string()),
                );
            }
        }

        let preferred = self.policy.preferred_bitrate;
        let fallback = self.policy.fallback_bitrate;

        let (result, bitrate) = match self.transfer(track, &path, preferred).await {
            Ok(()) => (Ok(()), preferred),
            Err(DownloadError::InvalidBitrate { .. }) => {
                tracing::debug!(
                    track = %track,
                    "{}kbps unavailable, retrying at {}kbps",
                    preferred,
                    fallback
                );
                (self.transfer(track, &path, fallback).await, fallback)
            }
            Err(DownloadError::TimedOut) => {
                tracing::debug!(
                    track = %track,
                    "Timed out, retrying at {}kbps in {:?}",
                    fallback,
                    self.policy.retry_backoff
                );
                tokio::time::sleep(self.policy.retry_backoff).await;
                (self.transfer(track, &path, fallback).await, fallback)
            }
            Err(error) => (Err(error), preferred),
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    track = %track,
                    "Downloaded at {}kbps: {}",
                    bitrate,
                    path.display()
                );
                DownloadOutcome::succeeded(track.clone(), path, bitrate)
            }
            Err(error) => DownloadOutcome::failed(track.clone(), Some(path), error),
        }
    }

    /// Transfer into the partial path and move it into place only on success.
    async fn transfer(
        &self,
        track: &TrackRef,
        path: &Path,
        bitrate_kbps: u32,
    ) -> Result<(), DownloadError> {
        let partial = partial_path(path);

        let result = self
            .client
            .download_track(track, &partial, self.policy.codec, bitrate_kbps)
            .await;

        match result {
            Ok(()) => tokio::fs::rename(&partial, path)
                .await
                .map_err(|e| DownloadError::Other(format!("Failed to finalize download: {}", e))),
            Err(error) => {
                remove_partial(path).await;
                Err(error)
            }
        }
    }
}
