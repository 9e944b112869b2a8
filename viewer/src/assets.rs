//! Playlist data model.
//!
//! The admin API describes a device with a `tv-state` document. It is parsed
//! into the wire structs below and converted into an immutable
//! [`DeviceState`], which is what the coordinator publishes and the cache and
//! scheduler read.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a playlist asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    /// Anything the viewer cannot play. Dropped during conversion.
    #[serde(other)]
    Unsupported,
}

impl MediaKind {
    /// Lowercase name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }
}

/// Kind of a priority stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Youtube,
}

/// A live source that preempts the playlist while it is set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PriorityStream {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub url: String,
}

/// One playable playlist item.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    pub url: String,
    pub order: i64,
    /// Display time in seconds. Only images use it.
    pub duration: Option<f32>,
}

impl Asset {
    /// Whether two assets play identically. Display names are ignored.
    pub fn same_playback(&self, other: &Asset) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.url == other.url
            && self.order == other.order
            && self.duration == other.duration
    }

    /// Where a surface should load this asset from, given its cache status.
    pub fn source(&self, status: &CacheStatus) -> MediaSource {
        match status {
            CacheStatus::ReadyLocal(path) => MediaSource::Local(path.clone()),
            _ => MediaSource::Remote(self.url.clone()),
        }
    }
}

/// Compare two order-sorted asset lists for playback equivalence.
pub fn same_assets(a: &[Asset], b: &[Asset]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_playback(y))
}

/// Cache status of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheStatus {
    #[default]
    NotCached,
    Downloading,
    ReadyLocal(PathBuf),
    /// The download failed; the asset plays from its remote URL.
    ReadyRemoteFallback,
}

impl CacheStatus {
    /// Whether a pass is done with this asset.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CacheStatus::ReadyLocal(_) | CacheStatus::ReadyRemoteFallback
        )
    }
}

/// Resolved location of a playable asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Local(PathBuf),
    Remote(String),
}

impl std::fmt::Display for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Local(path) => write!(f, "{}", path.display()),
            MediaSource::Remote(url) => f.write_str(url),
        }
    }
}

/// The ordered collection of assets assigned to this device.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    assets: Vec<Asset>,
}

impl Playlist {
    /// Build a playlist. Assets are sorted by order, ties broken by id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, mut assets: Vec<Asset>) -> Self {
        assets.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Self {
            id: id.into(),
            name: name.into(),
            assets,
        }
    }

    /// Assets in display order.
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }
}

/// The group this device belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
}

/// Snapshot of everything the admin API says about this device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceState {
    pub device_name: String,
    pub group: Option<Group>,
    pub playlist: Option<Playlist>,
    pub priority_stream: Option<PriorityStream>,
}

impl DeviceState {
    /// State of a device that belongs to no group.
    pub fn ungrouped() -> Self {
        Self::default()
    }

    /// Whether the device belongs to a group.
    pub fn is_grouped(&self) -> bool {
        self.group.is_some()
    }

    /// Assets of the current playlist in display order, empty when there is none.
    pub fn assets(&self) -> &[Asset] {
        self.playlist.as_ref().map(Playlist::assets).unwrap_or(&[])
    }
}

/// `tv-state` document as served by the admin API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvState {
    pub tv_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<GroupPayload>,
    #[serde(default)]
    pub playlist: Option<PlaylistPayload>,
}

/// `group` object of the state payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority_stream: Option<PriorityStream>,
}

/// `playlist` object of the state payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaylistPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ads: Vec<AdPayload>,
}

/// One entry of `playlist.ads`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    #[serde(default)]
    pub duration: Option<f32>,
    #[serde(default)]
    pub order: Option<i64>,
}

impl From<TvState> for DeviceState {
    fn from(state: TvState) -> Self {
        let (group, priority_stream) = match state.group {
            Some(g) => (
                Some(Group {
                    id: g.id,
                    name: g.name,
                }),
                g.priority_stream,
            ),
            None => (None, None),
        };

        let playlist = state.playlist.map(|p| {
            let assets = p
                .ads
                .into_iter()
                .enumerate()
                .filter_map(|(position, ad)| {
                    if ad.kind == MediaKind::Unsupported {
                        tracing::warn!("Skipping asset {} with unsupported media type", ad.id);
                        return None;
                    }
                    Some(Asset {
                        order: ad.order.unwrap_or(position as i64),
                        id: ad.id,
                        name: ad.name,
                        kind: ad.kind,
                        url: ad.url,
                        duration: ad.duration,
                    })
                })
                .collect();
            Playlist::new(p.id, p.name, assets)
        });

        DeviceState {
            device_name: state.name.unwrap_or_default(),
            group,
            playlist,
            priority_stream,
        }
    }
}
