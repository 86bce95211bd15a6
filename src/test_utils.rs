use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::ports::music_service::{
    Codec, DownloadError, MusicServiceClient, PlaylistRef, RemotePlaylist, ServiceError,
    TrackMetadata, TrackRef,
};

pub const TEST_USER_UID: u64 = 42;

/// In-memory music service that actually writes files, sleeps on demand and
/// records what happened. Used where mocks cannot express timing.
#[derive(Default)]
pub struct FakeMusicService {
    favorites: Vec<TrackRef>,
    playlists: Vec<(RemotePlaylist, Vec<TrackRef>)>,
    playlist_errors: HashMap<u64, ServiceError>,
    listing_error: Option<ServiceError>,
    metadata: HashMap<String, TrackMetadata>,
    delays: HashMap<String, Duration>,
    scripted: Mutex<HashMap<String, VecDeque<Result<(), DownloadError>>>>,
    unauthorized_after: Option<usize>,
    downloads: Mutex<Vec<(String, u32)>>,
    completed: Mutex<Vec<String>>,
    playlist_fetches: Mutex<Vec<PlaylistRef>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn tracks(ids: &[&str]) -> Vec<TrackRef> {
    ids.iter().map(|id| TrackRef::new(*id)).collect()
}

impl FakeMusicService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_favorites(mut self, ids: &[&str]) -> Self {
        self.favorites = tracks(ids);
        self
    }

    pub fn with_playlist(mut self, title: &str, kind: u64, ids: &[&str]) -> Self {
        self.playlists.push((
            RemotePlaylist {
                title: title.to_string(),
                handle: PlaylistRef {
                    owner_uid: TEST_USER_UID,
                    kind,
                },
            },
            tracks(ids),
        ));
        self
    }

    pub fn with_playlist_error(mut self, kind: u64, error: ServiceError) -> Self {
        self.playlist_errors.insert(kind, error);
        self
    }

    pub fn with_listing_error(mut self, error: ServiceError) -> Self {
        self.listing_error = Some(error);
        self
    }

    pub fn with_track(mut self, id: &str, artist: &str, title: &str) -> Self {
        self.metadata.insert(
            id.to_string(),
            TrackMetadata {
                title: title.to_string(),
                artists: vec![artist.to_string()],
            },
        );
        self
    }

    pub fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    /// Results returned by successive download attempts of `id`; once used
    /// up, attempts succeed.
    pub fn with_download_results(self, id: &str, results: Vec<Result<(), DownloadError>>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(id.to_string(), results.into());
        self
    }

    /// Every download attempt after the first `count` reports an invalid session.
    pub fn with_unauthorized_after(mut self, count: usize) -> Self {
        self.unauthorized_after = Some(count);
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn downloaded_ids(&self) -> Vec<String> {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn downloaded_bitrates(&self, id: &str) -> Vec<u32> {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|(track_id, _)| track_id == id)
            .map(|(_, bitrate)| *bitrate)
            .collect()
    }

    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn playlist_fetches(&self) -> Vec<PlaylistRef> {
        self.playlist_fetches.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn distinct_downloads(&self) -> HashSet<String> {
        self.downloaded_ids().into_iter().collect()
    }
}

#[async_trait::async_trait]
impl MusicServiceClient for FakeMusicService {
    async fn fetch_favorites(&self, _user_uid: u64) -> Result<Vec<TrackRef>, ServiceError> {
        Ok(self.favorites.clone())
    }

    async fn list_playlists(&self, _user_uid: u64) -> Result<Vec<RemotePlaylist>, ServiceError> {
        if let Some(error) = &self.listing_error {
            return Err(error.clone());
        }
        Ok(self.playlists.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn fetch_playlist_tracks(
        &self,
        playlist: &PlaylistRef,
    ) -> Result<Vec<TrackRef>, ServiceError> {
        self.playlist_fetches.lock().unwrap().push(playlist.clone());
        if let Some(error) = self.playlist_errors.get(&playlist.kind) {
            return Err(error.clone());
        }
        self.playlists
            .iter()
            .find(|(p, _)| p.handle == *playlist)
            .map(|(_, tracks)| tracks.clone())
            .ok_or_else(|| ServiceError::Other(format!("no playlist {}", playlist.kind)))
    }

    async fn fetch_track(&self, track: &TrackRef) -> Result<TrackMetadata, ServiceError> {
        Ok(self
            .metadata
            .get(&track.id)
            .cloned()
            .unwrap_or_else(|| TrackMetadata {
                title: format!("Song {}", track.id),
                artists: vec![format!("Artist {}", track.id)],
            }))
    }

    async fn download_track(
        &self,
        track: &TrackRef,
        destination: &Path,
        _codec: Codec,
        bitrate_kbps: u32,
    ) -> Result<(), DownloadError> {
        let attempt = {
            let mut downloads = self.downloads.lock().unwrap();
            downloads.push((track.id.clone(), bitrate_kbps));
            downloads.len()
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        // Bytes land before the delay and the result, like a transfer that is
        // still running or gets cut off midway
        tokio::fs::write(destination, format!("audio {} @{}", track.id, bitrate_kbps))
            .await
            .map_err(|e| DownloadError::Other(e.to_string()))?;

        if let Some(delay) = self.delays.get(&track.id) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&track.id)
            .and_then(VecDeque::pop_front);
        let result = match (scripted, self.unauthorized_after) {
            (Some(result), _) => result,
            (None, Some(limit)) if attempt > limit => Err(DownloadError::Unauthorized),
            (None, _) => Ok(()),
        };

        self.completed.lock().unwrap().push(track.id.clone());
        result
    }
}
