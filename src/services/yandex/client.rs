use std::path::Path;
use std::time::Duration;

use md5::{Digest, Md5};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::ports::music_service::{
    Codec, DownloadError, MusicServiceClient, PlaylistRef, RemotePlaylist, ServiceError,
    TrackMetadata, TrackRef,
};
use crate::services::users::UserIdentity;
use crate::services::yandex::types::{
    DirectLinkParts, YandexDownloadInfo, YandexLikes, YandexPlaylist, YandexResponse,
    YandexTrack, YandexTrackShort, YandexUser,
};

const API_BASE_URL: &str = "https://api.music.yandex.net";

/// Salt mixed into the signature of direct download links.
const SIGN_SALT: &str = "XGRlBW9FXlekgbPrRHuSiA";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

fn service_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        return ServiceError::TimedOut;
    }
    match error.status() {
        Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => ServiceError::Unauthorized,
        _ => ServiceError::Other(error.to_string()),
    }
}

fn download_error(error: reqwest::Error) -> DownloadError {
    service_error(error).into()
}

/// Pull `host`, `path`, `ts` and `s` out of the download-info XML document.
pub fn parse_direct_link(body: &str) -> Option<DirectLinkParts> {
    fn tag(body: &str, name: &str) -> Option<String> {
        let pattern = Regex::new(&format!(r"<{name}>\s*([^<]*?)\s*</{name}>")).ok()?;
        pattern
            .captures(body)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }

    Some(DirectLinkParts {
        host: tag(body, "host")?,
        path: tag(body, "path")?,
        ts: tag(body, "ts")?,
        s: tag(body, "s")?,
    })
}

pub fn sign_direct_link(parts: &DirectLinkParts) -> String {
    let path = parts.path.strip_prefix('/').unwrap_or(&parts.path);
    let digest = Md5::digest(format!("{}{}{}", SIGN_SALT, path, parts.s).as_bytes());
    format!("{:x}", digest)
}

pub fn direct_link_url(parts: &DirectLinkParts, codec: Codec) -> String {
    format!(
        "https://{}/get-{}/{}/{}{}",
        parts.host,
        codec.as_str(),
        sign_direct_link(parts),
        parts.ts,
        parts.path
    )
}

/// The variant matching both codec and bitrate, if the track offers one.
fn select_variant(
    variants: Vec<YandexDownloadInfo>,
    codec: Codec,
    bitrate_kbps: u32,
) -> Option<YandexDownloadInfo> {
    variants
        .into_iter()
        .find(|info| info.codec == codec.as_str() && info.bitrate_in_kbps == bitrate_kbps)
}

fn track_ref(short: YandexTrackShort) -> TrackRef {
    TrackRef {
        id: short.id,
        album_id: short.album_id,
    }
}

/// Yandex Music API client
pub struct YandexMusicClient {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl YandexMusicClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            base_url: API_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, format!("OAuth {}", self.token))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(service_error)?
            .error_for_status()
            .map_err(service_error)?;

        let body: YandexResponse<T> = response.json().await.map_err(service_error)?;
        Ok(body.result)
    }

    /// Resolve a login to its account. Unknown logins and failed lookups
    /// both come back as `None`.
    #[instrument(skip(self))]
    pub async fn lookup_user(&self, login: &str) -> Option<UserIdentity> {
        let user: YandexUser = match self.get_json(&format!("/users/{}", login)).await {
            Ok(user) => user,
            Err(error) => {
                tracing::warn!("Failed to look up user {}: {}", login, error);
                return None;
            }
        };

        match user.uid.parse() {
            Ok(remote_uid) => Some(UserIdentity {
                id: None,
                login: user.login,
                remote_uid,
            }),
            Err(_) => {
                tracing::warn!("User {} has a non-numeric uid: {}", login, user.uid);
                None
            }
        }
    }

    async fn resolve_direct_link(
        &self,
        track: &TrackRef,
        codec: Codec,
        bitrate_kbps: u32,
    ) -> Result<String, DownloadError> {
        let variants: Vec<YandexDownloadInfo> = self
            .get_json(&format!("/tracks/{}/download-info", track.id))
            .await?;
        let variant = select_variant(variants, codec, bitrate_kbps)
            .ok_or(DownloadError::InvalidBitrate { bitrate_kbps })?;

        let body = self
            .client
            .get(&variant.download_info_url)
            .header(AUTHORIZATION, format!("OAuth {}", self.token))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(download_error)?
            .error_for_status()
            .map_err(download_error)?
            .text()
            .await
            .map_err(download_error)?;

        let parts = parse_direct_link(&body).ok_or_else(|| {
            DownloadError::Other(format!("Malformed download info for track {}", track))
        })?;
        Ok(direct_link_url(&parts, codec))
    }
}

#[async_trait::async_trait]
impl MusicServiceClient for YandexMusicClient {
    #[instrument(skip(self))]
    async fn fetch_favorites(&self, user_uid: u64) -> Result<Vec<TrackRef>, ServiceError> {
        let likes: YandexLikes = self
            .get_json(&format!("/users/{}/likes/tracks", user_uid))
            .await?;
        Ok(likes.library.tracks.into_iter().map(track_ref).collect())
    }

    #[instrument(skip(self))]
    async fn list_playlists(&self, user_uid: u64) -> Result<Vec<RemotePlaylist>, ServiceError> {
        let playlists: Vec<YandexPlaylist> = self
            .get_json(&format!("/users/{}/playlists/list", user_uid))
            .await?;

        Ok(playlists
            .into_iter()
            .map(|playlist| {
                tracing::debug!(
                    "Playlist '{}' has {} tracks",
                    playlist.title,
                    playlist.track_count
                );
                RemotePlaylist {
                    title: playlist.title,
                    handle: PlaylistRef {
                        owner_uid: playlist.owner.uid,
                        kind: playlist.kind,
                    },
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_playlist_tracks(
        &self,
        playlist: &PlaylistRef,
    ) -> Result<Vec<TrackRef>, ServiceError> {
        #[derive(serde::Deserialize)]
        struct PlaylistTrackItem {
            id: serde_json::Value,
            #[serde(default)]
            track: Option<YandexTrackShort>,
        }

        #[derive(serde::Deserialize)]
        struct PlaylistWithTracks {
            #[serde(default)]
            tracks: Vec<PlaylistTrackItem>,
        }

        let body: PlaylistWithTracks = self
            .get_json(&format!(
                "/users/{}/playlists/{}",
                playlist.owner_uid, playlist.kind
            ))
            .await?;

        Ok(body
            .tracks
            .into_iter()
            .map(|item| match item.track {
                Some(track) => track_ref(track),
                None => TrackRef::new(match item.id {
                    serde_json::Value::String(id) => id,
                    other => other.to_string(),
                }),
            })
            .collect())
    }

    #[instrument(skip(self), fields(track = %track))]
    async fn fetch_track(&self, track: &TrackRef) -> Result<TrackMetadata, ServiceError> {
        let tracks: Vec<YandexTrack> = self.get_json(&format!("/tracks/{}", track.id)).await?;
        let found = tracks
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Other(format!("Track {} not found", track)))?;

        let title = match found.version {
            Some(version) if !version.is_empty() => format!("{} ({})", found.title, version),
            _ => found.title,
        };

        Ok(TrackMetadata {
            title,
            artists: found.artists.into_iter().map(|a| a.name).collect(),
        })
    }

    #[instrument(skip(self, destination), fields(track = %track))]
    async fn download_track(
        &self,
        track: &TrackRef,
        destination: &Path,
        codec: Codec,
        bitrate_kbps: u32,
    ) -> Result<(), DownloadError> {
        let url = self.resolve_direct_link(track, codec, bitrate_kbps).await?;

        let mut response = self
            .client
            .get(&url)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await
            .map_err(download_error)?
            .error_for_status()
            .map_err(download_error)?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| DownloadError::Other(e.to_string()))?;

        while let Some(chunk) = response.chunk().await.map_err(download_error)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::Other(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| DownloadError::Other(e.to_string()))?;

        tracing::debug!("Downloaded {} at {}kbps", track, bitrate_kbps);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOWNLOAD_INFO_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<download-info><host>s123.storage.yandex.net</host><path>/get-mp3/abc/123.mp3</path><ts>0005d1a2b3c4</ts><region>-1</region><s>secret</s></download-info>"#;

    fn variant(codec: &str, bitrate: u32) -> YandexDownloadInfo {
        YandexDownloadInfo {
            codec: codec.to_string(),
            bitrate_in_kbps: bitrate,
            download_info_url: format!("https://storage/{}/{}", codec, bitrate),
        }
    }

    #[test]
    fn test_parse_direct_link() {
        let parts = parse_direct_link(DOWNLOAD_INFO_XML).unwrap();
        assert_eq!(
            parts,
            DirectLinkParts {
                host: "s123.storage.yandex.net".to_string(),
                path: "/get-mp3/abc/123.mp3".to_string(),
                ts: "0005d1a2b3c4".to_string(),
                s: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_direct_link_missing_tag() {
        assert_eq!(
            parse_direct_link("<download-info><host>h</host><path>/p</path></download-info>"),
            None
        );
    }

    #[test]
    fn test_sign_drops_leading_slash() {
        let parts = parse_direct_link(DOWNLOAD_INFO_XML).unwrap();
        assert_eq!(sign_direct_link(&parts), "29af0844288a4758f231a274ce7607c5");
    }

    #[test]
    fn test_direct_link_url() {
        let parts = parse_direct_link(DOWNLOAD_INFO_XML).unwrap();
        assert_eq!(
            direct_link_url(&parts, Codec::Mp3),
            "https://s123.storage.yandex.net/get-mp3/29af0844288a4758f231a274ce7607c5/0005d1a2b3c4/get-mp3/abc/123.mp3"
        );
    }

    #[test]
    fn test_select_variant_matches_codec_and_bitrate() {
        let variants = vec![variant("aac", 320), variant("mp3", 192), variant("mp3", 320)];

        let chosen = select_variant(variants.clone(), Codec::Mp3, 320).unwrap();
        assert_eq!(chosen.download_info_url, "https://storage/mp3/320");

        assert!(select_variant(variants.clone(), Codec::Aac, 192).is_none());
        assert!(select_variant(variants, Codec::Mp3, 128).is_none());
    }
}
