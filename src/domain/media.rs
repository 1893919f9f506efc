//! Media assets: persisted download state and deterministic local paths

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Sqlite, Type};
use url::Url;

use crate::domain::entities::{PanoramaPhoto, Photo, Record};
use crate::domain::keys::{PanoramaFrameKey, PhotoKey};

/// Extension used when the URL path does not carry a usable one.
pub const DEFAULT_EXTENSION: &str = ".jpg";
const MAX_EXTENSION_CHARS: usize = 5;

/// Download state persisted with each media row.
///
/// `Pending` with a remote URL is the resume signal. `Downloading` left behind by an interrupted
/// process is treated like `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    #[default]
    Pending,
    Downloading,
    Local,
}

impl AssetState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<Sqlite> for AssetState {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <String as Type<Sqlite>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Sqlite> for AssetState {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<Sqlite>>::decode(value)?;
        match s.as_str() {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "local" => Ok(Self::Local),
            _ => Err(format!("Invalid AssetState: {s}").into()),
        }
    }
}

/// Identity of a downloadable asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKey {
    Photo(PhotoKey),
    PanoramaFrame(PanoramaFrameKey),
}

impl AssetKey {
    /// Token used for same-key serialization.
    #[must_use]
    pub fn lock_token(&self) -> String {
        match self {
            Self::Photo(key) => format!("photo:{key}"),
            Self::PanoramaFrame(key) => format!("panorama_photo:{key}"),
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lock_token())
    }
}

/// A stored record that owns one downloadable file.
pub trait MediaRecord: Record {
    fn asset_key(&self) -> AssetKey;

    fn remote_url(&self) -> Option<&str>;

    fn local_path(&self) -> Option<&str>;

    fn asset_state(&self) -> AssetState;

    /// Path relative to the media root, `/`-separated.
    fn relative_path(&self) -> String;
}

impl MediaRecord for Photo {
    fn asset_key(&self) -> AssetKey {
        AssetKey::Photo(self.key())
    }

    fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    fn local_path(&self) -> Option<&str> {
        self.local_path.as_deref()
    }

    fn asset_state(&self) -> AssetState {
        self.asset_state
    }

    fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}_original{}",
            self.series_id,
            self.spec_id,
            self.category_id,
            self.color_id.unwrap_or(0),
            sanitize_component(&self.id),
            extension_from_url(self.remote_url.as_deref()),
        )
    }
}

impl MediaRecord for PanoramaPhoto {
    fn asset_key(&self) -> AssetKey {
        AssetKey::PanoramaFrame(self.key())
    }

    fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    fn local_path(&self) -> Option<&str> {
        self.local_path.as_deref()
    }

    fn asset_state(&self) -> AssetState {
        self.asset_state
    }

    fn relative_path(&self) -> String {
        format!(
            "{}/360/{}/{:03}{}",
            self.spec_id,
            self.color_id,
            self.seq,
            extension_from_url(self.remote_url.as_deref()),
        )
    }
}

/// Lowercased extension of the URL path including the dot, or [`DEFAULT_EXTENSION`].
#[must_use]
pub fn extension_from_url(remote_url: Option<&str>) -> String {
    let path = remote_url
        .and_then(|raw| {
            Url::parse(raw)
                .or_else(|_| Url::parse(&format!("https:{raw}")))
                .ok()
        })
        .map(|url| url.path().to_string())
        .unwrap_or_default();

    let file_name = path.rsplit('/').next().unwrap_or_default();
    match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() => {
            let ext: String = file_name[dot..]
                .to_lowercase()
                .chars()
                .take(MAX_EXTENSION_CHARS)
                .collect();
            ext
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
