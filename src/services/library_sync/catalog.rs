use std::collections::HashSet;

use tracing::instrument;

use crate::ports::music_service::{MusicServiceClient, PlaylistRef, ServiceError, TrackRef};
use crate::ports::transliterate::Transliterator;
use crate::services::users::UserIdentity;

use super::layout::directory_component;

/// Catalog key of the pseudo-playlist holding the user's liked tracks.
pub const FAVORITES_PLAYLIST_TITLE: &str = "MyFavoritePlaylist";

const NO_BREAK_SPACE: char = '\u{a0}';

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Music service is unavailable while {operation}: {source}")]
    UpstreamUnavailable {
        operation: &'static str,
        #[source]
        source: ServiceError,
    },
}

impl CatalogError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            CatalogError::UpstreamUnavailable {
                source: ServiceError::Unauthorized,
                ..
            }
        )
    }
}

/// Where a playlist's tracks come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistTracks {
    /// Already known when the catalog was built (favorites).
    Resolved(Vec<TrackRef>),
    /// Fetched on demand right before the playlist is downloaded.
    Deferred(PlaylistRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistHandle {
    /// Sanitized title, also used as the directory name.
    pub title: String,
    pub tracks: PlaylistTracks,
}

/// Two remote playlists that ended up with the same sanitized title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleCollision {
    pub title: String,
    pub renamed_to: String,
}

/// In-memory playlist -> tracks mapping for one user and one run.
///
/// Iteration follows insertion order: favorites first, then the remote listing.
#[derive(Debug, Default)]
pub struct PlaylistCatalog {
    playlists: Vec<PlaylistHandle>,
    titles: HashSet<String>,
    collisions: Vec<TitleCollision>,
}

impl PlaylistCatalog {
    #[instrument(skip(client, transliterator, identity), fields(login = %identity.login))]
    pub async fn build<C>(
        client: &C,
        transliterator: &dyn Transliterator,
        identity: &UserIdentity,
    ) -> Result<Self, CatalogError>
    where
        C: MusicServiceClient + ?Sized,
    {
        let mut catalog = Self::default();

        let favorites = client
            .fetch_favorites(identity.remote_uid)
            .await
            .map_err(|source| CatalogError::UpstreamUnavailable {
                operation: "fetching liked tracks",
                source,
            })?;
        if favorites.is_empty() {
            tracing::debug!("User {} has no liked tracks", identity.login);
        } else {
            tracing::info!(
                "Found {} liked tracks for {}",
                favorites.len(),
                identity.login
            );
            catalog.insert(
                FAVORITES_PLAYLIST_TITLE.to_string(),
                PlaylistTracks::Resolved(favorites),
            );
        }

        let playlists = client
            .list_playlists(identity.remote_uid)
            .await
            .map_err(|source| CatalogError::UpstreamUnavailable {
                operation: "listing playlists",
                source,
            })?;
        if playlists.is_empty() {
            tracing::info!(
                "User {} has no playlists or they are hidden",
                identity.login
            );
            return Ok(catalog);
        }

        for playlist in playlists {
            let title = sanitize_title(transliterator, &playlist.title);
            tracing::debug!("Playlist '{}' stored as '{}'", playlist.title, title);
            catalog.insert(title, PlaylistTracks::Deferred(playlist.handle));
        }

        Ok(catalog)
    }

    #[cfg(test)]
    pub fn from_playlists(playlists: Vec<PlaylistHandle>) -> Self {
        let mut catalog = Self::default();
        for playlist in playlists {
            catalog.insert(playlist.title, playlist.tracks);
        }
        catalog
    }

    fn insert(&mut self, title: String, tracks: PlaylistTracks) {
        let title = if self.titles.contains(&title) {
            let renamed = (2..)
                .map(|n| format!("{} ({})", title, n))
                .find(|candidate| !self.titles.contains(candidate))
                .unwrap_or_else(|| title.clone());
            tracing::warn!(
                "Playlist title '{}' is already taken, storing it as '{}'",
                title,
                renamed
            );
            self.collisions.push(TitleCollision {
                title,
                renamed_to: renamed.clone(),
            });
            renamed
        } else {
            title
        };

        self.titles.insert(title.clone());
        self.playlists.push(PlaylistHandle { title, tracks });
    }

    pub fn playlists(&self) -> &[PlaylistHandle] {
        &self.playlists
    }

    pub fn titles(&self) -> Vec<&str> {
        self.playlists.iter().map(|p| p.title.as_str()).collect()
    }

    pub fn collisions(&self) -> &[TitleCollision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }
}

/// Replace no-break spaces, rewrite into the on-disk alphabet, then apply the
/// directory naming rules, so the catalog key is the exact directory name.
pub fn sanitize_title(transliterator: &dyn Transliterator, raw: &str) -> String {
    let normalized = raw.replace(NO_BREAK_SPACE, " ");
    directory_component(&transliterator.transliterate(&normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::music_service::{MockMusicServiceClient, RemotePlaylist};
    use crate::services::transliterate::RussianLatinTransliterator;

    fn identity() -> UserIdentity {
        UserIdentity {
            id: Some(1),
            login: "ivan".to_string(),
            remote_uid: 42,
        }
    }

    fn remote(title: &str, kind: u64) -> RemotePlaylist {
        RemotePlaylist {
            title: title.to_string(),
            handle: PlaylistRef {
                owner_uid: 42,
                kind,
            },
        }
    }

    #[tokio::test]
    async fn test_favorites_come_before_named_playlists() {
        let mut client = MockMusicServiceClient::new();
        client
            .expect_fetch_favorites()
            .withf(|uid| *uid == 42)
            .returning(|_| Ok(vec![TrackRef::new("1"), TrackRef::new("2")]));
        client
            .expect_list_playlists()
            .returning(|_| Ok(vec![remote("Gamma", 3), remote("Alpha", 1)]));

        let catalog = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap();

        assert_eq!(
            catalog.titles(),
            vec![FAVORITES_PLAYLIST_TITLE, "Gamma", "Alpha"]
        );
        assert_eq!(
            catalog.playlists()[0].tracks,
            PlaylistTracks::Resolved(vec![TrackRef::new("1"), TrackRef::new("2")])
        );
        assert_eq!(
            catalog.playlists()[1].tracks,
            PlaylistTracks::Deferred(PlaylistRef {
                owner_uid: 42,
                kind: 3
            })
        );
    }

    #[tokio::test]
    async fn test_empty_favorites_are_not_inserted() {
        let mut client = MockMusicServiceClient::new();
        client.expect_fetch_favorites().returning(|_| Ok(vec![]));
        client
            .expect_list_playlists()
            .returning(|_| Ok(vec![remote("Alpha", 1)]));

        let catalog = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap();

        assert_eq!(catalog.titles(), vec!["Alpha"]);
    }

    #[tokio::test]
    async fn test_no_playlists_is_not_an_error() {
        let mut client = MockMusicServiceClient::new();
        client.expect_fetch_favorites().returning(|_| Ok(vec![]));
        client.expect_list_playlists().returning(|_| Ok(vec![]));

        let catalog = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap();

        assert!(catalog.is_empty());
        assert_eq!(catalog.len(), 0);
    }

    #[tokio::test]
    async fn test_titles_are_normalized_and_transliterated() {
        let mut client = MockMusicServiceClient::new();
        client.expect_fetch_favorites().returning(|_| Ok(vec![]));
        client
            .expect_list_playlists()
            .returning(|_| Ok(vec![remote("Рок\u{a0}плейлист", 1)]));

        let catalog = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap();

        assert_eq!(catalog.titles(), vec!["Rok plejlist"]);
    }

    #[tokio::test]
    async fn test_title_collisions_are_renamed_and_reported() {
        let mut client = MockMusicServiceClient::new();
        client.expect_fetch_favorites().returning(|_| Ok(vec![]));
        client.expect_list_playlists().returning(|_| {
            Ok(vec![
                remote("Rok", 1),
                remote("Рок", 2),
                remote("Ro/k\u{a0}", 3),
                remote("Pop", 4),
            ])
        });

        let catalog = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap();

        assert_eq!(catalog.titles(), vec!["Rok", "Rok (2)", "Rok (3)", "Pop"]);
        assert_eq!(
            catalog.collisions(),
            &[
                TitleCollision {
                    title: "Rok".to_string(),
                    renamed_to: "Rok (2)".to_string()
                },
                TitleCollision {
                    title: "Rok".to_string(),
                    renamed_to: "Rok (3)".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_titles_falling_back_to_untitled_collide() {
        let mut client = MockMusicServiceClient::new();
        client.expect_fetch_favorites().returning(|_| Ok(vec![]));
        client.expect_list_playlists().returning(|_| {
            Ok(vec![
                remote("Untitled", 1),
                remote("///", 2),
                remote("...", 3),
            ])
        });

        let catalog = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap();

        assert_eq!(
            catalog.titles(),
            vec!["Untitled", "Untitled (2)", "Untitled (3)"]
        );
        assert_eq!(catalog.collisions().len(), 2);
    }

    #[test]
    fn test_sanitize_title_strips_forbidden_chars() {
        let mut transliterator = crate::ports::transliterate::MockTransliterator::new();
        transliterator
            .expect_transliterate()
            .returning(|text| text.to_string());

        assert_eq!(sanitize_title(&transliterator, " AC/DC:\u{a0}Live "), "ACDC Live");
    }

    #[tokio::test]
    async fn test_listing_failure_is_upstream_unavailable() {
        let mut client = MockMusicServiceClient::new();
        client.expect_fetch_favorites().returning(|_| Ok(vec![]));
        client
            .expect_list_playlists()
            .returning(|_| Err(ServiceError::Other("502 Bad Gateway".to_string())));

        let error = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            CatalogError::UpstreamUnavailable {
                source: ServiceError::Other(_),
                ..
            }
        ));
        assert!(!error.is_unauthorized());
    }

    #[tokio::test]
    async fn test_favorites_failure_aborts_catalog_build() {
        let mut client = MockMusicServiceClient::new();
        client
            .expect_fetch_favorites()
            .returning(|_| Err(ServiceError::Unauthorized));
        client.expect_list_playlists().times(0);

        let error = PlaylistCatalog::build(&client, &RussianLatinTransliterator, &identity())
            .await
            .unwrap_err();

        assert!(error.is_unauthorized());
    }
}
