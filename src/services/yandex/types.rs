use serde::{Deserialize, Deserializer};

/// Every API response wraps its payload in `result`
#[derive(Debug, Clone, Deserialize)]
pub struct YandexResponse<T> {
    pub result: T,
}

/// Ids arrive as JSON strings in some endpoints and as numbers in others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(id)| id))
}

/// Account as returned by `/users/{login}`
#[derive(Debug, Clone, Deserialize)]
pub struct YandexUser {
    pub login: String,
    #[serde(deserialize_with = "string_or_number")]
    pub uid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YandexLikes {
    pub library: YandexLibrary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YandexLibrary {
    #[serde(default)]
    pub tracks: Vec<YandexTrackShort>,
}

/// Track reference inside likes and playlists
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YandexTrackShort {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub album_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YandexPlaylist {
    pub title: String,
    pub kind: u64,
    pub owner: YandexOwner,
    #[serde(default)]
    pub track_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YandexOwner {
    pub uid: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YandexTrack {
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub artists: Vec<YandexArtist>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YandexArtist {
    pub name: String,
}

/// One codec/bitrate variant offered by `/tracks/{id}/download-info`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YandexDownloadInfo {
    pub codec: String,
    pub bitrate_in_kbps: u32,
    pub download_info_url: String,
}

/// Parsed body of a `downloadInfoUrl` XML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLinkParts {
    pub host: String,
    pub path: String,
    pub ts: String,
    pub s: String,
}
