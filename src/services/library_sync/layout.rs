use std::io;
use std::path::{Path, PathBuf};

use crate::ports::music_service::{Codec, TrackMetadata};
use crate::services::users::UserIdentity;

/// Characters that are illegal or troublesome on common filesystems.
const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '+'];

/// Suffix appended to a track path while its bytes are being transferred.
const PARTIAL_SUFFIX: &str = ".part";

/// Remove every forbidden character from a path component.
fn strip_forbidden(name: &str) -> String {
    name.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect()
}

/// Sanitize a directory name; never returns an empty or dot-only component.
pub fn directory_component(name: &str) -> String {
    let stripped = strip_forbidden(name);
    let trimmed = stripped.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Uppercase the first character and lowercase the rest: "IVAN.petrov" -> "Ivan.petrov".
fn capitalize(login: &str) -> String {
    let mut chars = login.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Path and naming policy for the mirrored tree:
/// `<music root>/<Login>/<playlist title>/<artist> - <title>.<ext>`.
#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    music_root: PathBuf,
    codec: Codec,
}

impl FilesystemLayout {
    pub fn new(music_root: impl Into<PathBuf>, codec: Codec) -> Self {
        Self {
            music_root: music_root.into(),
            codec,
        }
    }

    pub fn music_root(&self) -> &Path {
        &self.music_root
    }

    pub fn resolve_user_root(&self, identity: &UserIdentity) -> PathBuf {
        self.music_root
            .join(directory_component(&capitalize(&identity.login)))
    }

    pub fn resolve_playlist_dir(&self, user_root: &Path, playlist_title: &str) -> PathBuf {
        user_root.join(directory_component(playlist_title))
    }

    pub fn resolve_track_path(&self, playlist_dir: &Path, artist: &str, title: &str) -> PathBuf {
        let filename = format!("{} - {}.{}", artist, title, self.codec.file_extension());
        playlist_dir.join(strip_forbidden(&filename))
    }

    /// Create `path` and any missing parents. Existing directories are left alone,
    /// so a tree half-built by an interrupted run is completed.
    pub async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        if tokio::fs::try_exists(path).await? {
            return Ok(());
        }
        tracing::debug!("Creating directory: {}", path.display());
        tokio::fs::create_dir_all(path).await
    }

    /// Root, user and playlist directories, each checked and created on its own.
    pub async fn ensure_user_tree(&self, identity: &UserIdentity) -> io::Result<PathBuf> {
        self.ensure_dir(&self.music_root).await?;
        let user_root = self.resolve_user_root(identity);
        self.ensure_dir(&user_root).await?;
        Ok(user_root)
    }
}

/// A layout bound to one user's root directory; hands the scheduler
/// playlist directories and track paths.
#[derive(Debug, Clone)]
pub struct DestinationResolver {
    layout: FilesystemLayout,
    user_root: PathBuf,
}

impl DestinationResolver {
    pub fn new(layout: FilesystemLayout, user_root: PathBuf) -> Self {
        Self { layout, user_root }
    }

    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    pub fn playlist_dir(&self, playlist_title: &str) -> PathBuf {
        self.layout
            .resolve_playlist_dir(&self.user_root, playlist_title)
    }

    pub async fn prepare_playlist_dir(&self, playlist_title: &str) -> io::Result<PathBuf> {
        let dir = self.playlist_dir(playlist_title);
        self.layout.ensure_dir(&dir).await?;
        Ok(dir)
    }

    pub fn track_path(&self, playlist_dir: &Path, metadata: &TrackMetadata) -> PathBuf {
        self.layout
            .resolve_track_path(playlist_dir, metadata.primary_artist(), &metadata.title)
    }
}

/// Temporary path a transfer writes into before being renamed into place.
pub fn partial_path(track_path: &Path) -> PathBuf {
    let mut raw = track_path.as_os_str().to_owned();
    raw.push(PARTIAL_SUFFIX);
    PathBuf::from(raw)
}
