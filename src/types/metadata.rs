use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Sentinel community name for items that do not belong to any community.
pub const NO_COMMUNITY: &str = "undefined";

/// Raw metadata payload returned by `GET /api/v2/coubs/{id}`.
///
/// The API is undocumented and irregular: on a missing item it answers with
/// `{"error": "Coub not found"}` and nothing else, stream sizes may be `0`
/// or `null` instead of absent, and the share version is sometimes the
/// literal string `"{}"`. Every field is therefore optional or defaulted and
/// interpretation is left to the stream resolver.
#[derive(Debug, Default, Deserialize)]
pub struct MetadataPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub channel: ChannelInfo,
    #[serde(default)]
    pub tags: Vec<TagInfo>,
    #[serde(default)]
    pub communities: Vec<CommunityInfo>,
    #[serde(default)]
    pub file_versions: FileVersions,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagInfo {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommunityInfo {
    #[serde(default)]
    pub permalink: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileVersions {
    #[serde(default)]
    pub html5: Html5Versions,
    #[serde(default)]
    pub mobile: MobileVersions,
    #[serde(default)]
    pub share: ShareVersion,
}

#[derive(Debug, Default, Deserialize)]
pub struct Html5Versions {
    #[serde(default)]
    pub video: HashMap<String, StreamVersion>,
    #[serde(default)]
    pub audio: HashMap<String, StreamVersion>,
}

/// One html5 stream entry. A missing stream shows up as an absent key, a
/// `size` of `0`, or a `size` of `null`; all three mean "not there".
#[derive(Debug, Default, Deserialize)]
pub struct StreamVersion {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl StreamVersion {
    pub fn usable(&self) -> bool {
        self.url.is_some() && self.size.is_some_and(|s| s > 0)
    }
}

/// Mobile audio is a bare list of URLs without sizes. Index 0 is the best
/// quality when several are offered.
#[derive(Debug, Default, Deserialize)]
pub struct MobileVersions {
    #[serde(default)]
    pub audio: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareVersion {
    #[serde(default, rename = "default")]
    pub version: Option<Value>,
}

impl ShareVersion {
    /// The combined stream URL, when it actually exists.
    pub fn url(&self) -> Option<&str> {
        match &self.version {
            Some(Value::String(s)) if !s.is_empty() && s != "{}" => Some(s),
            _ => None,
        }
    }
}

/// The per-item fields kept once metadata has been fetched, as they appear
/// in the JSON sidecar log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ItemMeta {
    pub id: String,
    pub title: String,
    pub creation: String,
    pub channel: String,
    pub community: String,
    pub tags: Vec<String>,
}

impl ItemMeta {
    pub fn from_payload(id: &str, payload: &MetadataPayload) -> Self {
        let community = payload
            .communities
            .first()
            .map(|c| c.permalink.clone())
            .unwrap_or_else(|| NO_COMMUNITY.to_string());

        Self {
            id: id.to_string(),
            title: payload.title.clone(),
            creation: payload.created_at.clone(),
            channel: payload.channel.title.clone(),
            community,
            tags: payload.tags.iter().map(|t| t.title.clone()).collect(),
        }
    }
}
