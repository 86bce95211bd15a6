use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Opaque handle to a remote track.
///
/// Enough to fetch full metadata and to start a byte transfer. Carries no
/// mutable state: artist/title are fetched lazily at download time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub id: String,
    pub album_id: Option<String>,
}

impl TrackRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            album_id: None,
        }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.album_id {
            Some(album_id) => write!(f, "{}:{}", self.id, album_id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Handle used to fetch the tracks of one named playlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaylistRef {
    pub owner_uid: u64,
    pub kind: u64,
}

/// One entry of the remote playlist listing, with its raw title.
#[derive(Debug, Clone)]
pub struct RemotePlaylist {
    pub title: String,
    pub handle: PlaylistRef,
}

/// Full track metadata fetched right before a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artists: Vec<String>,
}

impl TrackMetadata {
    pub fn primary_artist(&self) -> &str {
        self.artists
            .first()
            .map(String::as_str)
            .unwrap_or("Unknown Artist")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    Aac,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Aac => "aac",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Aac => "m4a",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a metadata call (listing, favorites, playlist tracks, track info).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Session is unauthorized")]
    Unauthorized,
    #[error("Request timed out")]
    TimedOut,
    #[error("Service error: {0}")]
    Other(String),
}

/// Failure of a byte transfer, tagged so the retry policy can inspect it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("Bitrate {bitrate_kbps}kbps is not available for this track")]
    InvalidBitrate { bitrate_kbps: u32 },
    #[error("Download timed out")]
    TimedOut,
    #[error("Session is unauthorized")]
    Unauthorized,
    #[error("Download failed: {0}")]
    Other(String),
}

impl DownloadError {
    /// Short, stable name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::InvalidBitrate { .. } => "quality_unsupported",
            DownloadError::TimedOut => "transient",
            DownloadError::Unauthorized => "unauthorized",
            DownloadError::Other(_) => "other",
        }
    }
}

impl From<ServiceError> for DownloadError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Unauthorized => DownloadError::Unauthorized,
            ServiceError::TimedOut => DownloadError::TimedOut,
            ServiceError::Other(message) => DownloadError::Other(message),
        }
    }
}

/// Port trait wrapping the music-service capabilities used by the sync engine.
///
/// Implementations live in `services::yandex::client` (production) or test fakes.
/// Calls are stateless, so one handle is shared across concurrent downloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MusicServiceClient: Send + Sync {
    async fn fetch_favorites(&self, user_uid: u64) -> Result<Vec<TrackRef>, ServiceError>;

    async fn list_playlists(&self, user_uid: u64) -> Result<Vec<RemotePlaylist>, ServiceError>;

    async fn fetch_playlist_tracks(
        &self,
        playlist: &PlaylistRef,
    ) -> Result<Vec<TrackRef>, ServiceError>;

    async fn fetch_track(&self, track: &TrackRef) -> Result<TrackMetadata, ServiceError>;

    async fn download_track(
        &self,
        track: &TrackRef,
        destination: &Path,
        codec: Codec,
        bitrate_kbps: u32,
    ) -> Result<(), DownloadError>;
}
