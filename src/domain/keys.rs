//! Key resolution for catalog feed records
//!
//! Every raw record handed over by a listing is turned into exactly one stored entity with a
//! canonical key. Feeds reuse numeric ids across unrelated scopes, so several keys are tuples of
//! a scope id and a local id. Resolution is pure: it never looks at the store or at earlier passes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entities::{
    Brand, ColorType, EntityKind, PanoramaColor, PanoramaPhoto, ParamTitle, ParamValue, Photo,
    PhotoCategory, PhotoColor, Record, Series, Specification, SqlValue,
};
use crate::domain::media::AssetState;

/// Upper bound applied to parameter names before they become part of a key.
pub const MAX_NAME_CHARS: usize = 512;

/// A record could not be turned into a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyResolutionError {
    #[error("{kind} record is missing required field `{field}`")]
    MissingField { kind: EntityKind, field: &'static str },

    #[error("{kind} record has invalid `{field}`: {reason}")]
    InvalidField {
        kind: EntityKind,
        field: &'static str,
        reason: String,
    },
}

impl KeyResolutionError {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::MissingField { kind, .. } | Self::InvalidField { kind, .. } => *kind,
        }
    }
}

/// Canonical key of a stored entity.
pub trait EntityKey: Clone + fmt::Debug + fmt::Display + Eq + Send + Sync + 'static {
    /// Key column values, in the order of [`EntityKind::key_columns`].
    fn values(&self) -> Vec<SqlValue>;
}

macro_rules! scalar_key {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

scalar_key!(BrandKey, i64);
scalar_key!(SeriesKey, i64);
scalar_key!(SpecKey, i64);
scalar_key!(PhotoColorKey, i64);
scalar_key!(PanoramaColorKey, i64);
scalar_key!(PhotoKey, String);

impl EntityKey for BrandKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.0)]
    }
}

impl EntityKey for SeriesKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.0)]
    }
}

impl EntityKey for SpecKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.0)]
    }
}

impl EntityKey for PhotoColorKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.0)]
    }
}

impl EntityKey for PanoramaColorKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.0)]
    }
}

impl EntityKey for PhotoKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::text(self.0.clone())]
    }
}

/// Title ids are only unique inside one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamTitleKey {
    pub series_id: i64,
    pub title_id: i64,
}

impl fmt::Display for ParamTitleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.series_id, self.title_id)
    }
}

impl EntityKey for ParamTitleKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.series_id), SqlValue::int(self.title_id)]
    }
}

/// `sub_name` is never null: "no sub-parameter" is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamValueKey {
    pub spec_id: i64,
    pub title_id: i64,
    pub item_name: String,
    pub sub_name: String,
}

impl fmt::Display for ParamValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:?}/{:?}",
            self.spec_id, self.title_id, self.item_name, self.sub_name
        )
    }
}

impl EntityKey for ParamValueKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.spec_id),
            SqlValue::int(self.title_id),
            SqlValue::text(self.item_name.clone()),
            SqlValue::text(self.sub_name.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhotoCategoryKey {
    pub series_id: i64,
    pub category_id: i64,
}

impl fmt::Display for PhotoCategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.series_id, self.category_id)
    }
}

impl EntityKey for PhotoCategoryKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![SqlValue::int(self.series_id), SqlValue::int(self.category_id)]
    }
}

/// Frame ids are only unique per specification and panorama color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PanoramaFrameKey {
    pub seq: i64,
    pub spec_id: i64,
    pub color_id: i64,
}

impl fmt::Display for PanoramaFrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.seq, self.spec_id, self.color_id)
    }
}

impl EntityKey for PanoramaFrameKey {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.seq),
            SqlValue::int(self.spec_id),
            SqlValue::int(self.color_id),
        ]
    }
}

// ===============================
// RAW FEED RECORDS
// ===============================
//
// Parent ids come from the listing call and are always known. Fields read from the payload are
// optional; a missing key-bearing field is a resolution error.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBrand {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSeries {
    pub brand_id: i64,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub is_new_energy: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpecification {
    pub series_id: i64,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub min_price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParamTitle {
    pub series_id: i64,
    pub title_id: Option<i64>,
    pub item_name: Option<String>,
    pub group_name: Option<String>,
    pub item_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParamValue {
    pub series_id: i64,
    pub spec_id: i64,
    pub title_id: Option<i64>,
    pub item_name: Option<String>,
    pub sub_name: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPhotoColor {
    pub series_id: i64,
    pub color_type: ColorType,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub is_on_sale: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPhotoCategory {
    pub series_id: i64,
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPhoto {
    pub series_id: i64,
    pub spec_id: i64,
    pub category_id: i64,
    pub color_id: Option<i64>,
    pub id: Option<String>,
    pub remote_url: Option<String>,
    pub spec_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPanoramaColor {
    pub spec_id: i64,
    pub id: Option<i64>,
    pub ext_id: Option<i64>,
    pub base_color_name: Option<String>,
    pub color_name: Option<String>,
    pub color_value: Option<String>,
    pub color_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPanoramaFrame {
    pub spec_id: i64,
    pub color_id: i64,
    pub seq: Option<i64>,
    pub remote_url: Option<String>,
}

/// Turns a raw record into its stored entity.
pub trait Resolve {
    type Output: Record;

    fn resolve(self) -> Result<Self::Output, KeyResolutionError>;
}

const fn missing(kind: EntityKind, field: &'static str) -> KeyResolutionError {
    KeyResolutionError::MissingField { kind, field }
}

/// Clamps a name to [`MAX_NAME_CHARS`] on a character boundary.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    match name.char_indices().nth(MAX_NAME_CHARS) {
        Some((cut, _)) => name[..cut].to_string(),
        None => name.to_string(),
    }
}

/// Absent and empty sub-parameter names are the same key component.
#[must_use]
pub fn normalize_sub_name(sub_name: Option<&str>) -> String {
    sub_name.map(normalize_name).unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Resolve for RawBrand {
    type Output = Brand;

    fn resolve(self) -> Result<Brand, KeyResolutionError> {
        let id = self.id.ok_or_else(|| missing(EntityKind::Brand, "id"))?;
        Ok(Brand {
            id,
            name: self.name.unwrap_or_default(),
            logo_url: self.logo_url,
        })
    }
}

impl Resolve for RawSeries {
    type Output = Series;

    fn resolve(self) -> Result<Series, KeyResolutionError> {
        let id = self.id.ok_or_else(|| missing(EntityKind::Series, "id"))?;
        Ok(Series {
            id,
            brand_id: self.brand_id,
            name: self.name.unwrap_or_default(),
            is_new_energy: self.is_new_energy,
        })
    }
}

impl Resolve for RawSpecification {
    type Output = Specification;

    fn resolve(self) -> Result<Specification, KeyResolutionError> {
        let id = self
            .id
            .ok_or_else(|| missing(EntityKind::Specification, "id"))?;
        Ok(Specification {
            id,
            series_id: self.series_id,
            name: self.name.unwrap_or_default(),
            min_price: self.min_price,
        })
    }
}

impl Resolve for RawParamTitle {
    type Output = ParamTitle;

    fn resolve(self) -> Result<ParamTitle, KeyResolutionError> {
        let title_id = self
            .title_id
            .ok_or_else(|| missing(EntityKind::ParamTitle, "title_id"))?;
        Ok(ParamTitle {
            series_id: self.series_id,
            title_id,
            item_name: normalize_name(self.item_name.as_deref().unwrap_or_default()),
            group_name: self.group_name,
            item_type: self.item_type,
        })
    }
}

impl Resolve for RawParamValue {
    type Output = ParamValue;

    fn resolve(self) -> Result<ParamValue, KeyResolutionError> {
        let title_id = self
            .title_id
            .ok_or_else(|| missing(EntityKind::ParamValue, "title_id"))?;
        let item_name = self
            .item_name
            .as_deref()
            .map(normalize_name)
            .ok_or_else(|| missing(EntityKind::ParamValue, "item_name"))?;
        Ok(ParamValue {
            spec_id: self.spec_id,
            title_id,
            item_name,
            sub_name: normalize_sub_name(self.sub_name.as_deref()),
            series_id: self.series_id,
            value: self.value,
        })
    }
}

impl Resolve for RawPhotoColor {
    type Output = PhotoColor;

    fn resolve(self) -> Result<PhotoColor, KeyResolutionError> {
        let id = self.id.ok_or_else(|| missing(EntityKind::PhotoColor, "id"))?;
        Ok(PhotoColor {
            id,
            series_id: self.series_id,
            color_type: self.color_type,
            name: self.name.unwrap_or_default(),
            value: self.value,
            is_on_sale: self.is_on_sale,
        })
    }
}

impl Resolve for RawPhotoCategory {
    type Output = PhotoCategory;

    fn resolve(self) -> Result<PhotoCategory, KeyResolutionError> {
        let category_id = self
            .id
            .ok_or_else(|| missing(EntityKind::PhotoCategory, "id"))?;
        Ok(PhotoCategory {
            series_id: self.series_id,
            category_id,
            name: self.name.unwrap_or_default(),
        })
    }
}

impl Resolve for RawPhoto {
    type Output = Photo;

    fn resolve(self) -> Result<Photo, KeyResolutionError> {
        let id = non_empty(self.id).ok_or_else(|| missing(EntityKind::Photo, "id"))?;
        Ok(Photo {
            id,
            series_id: self.series_id,
            spec_id: self.spec_id,
            category_id: self.category_id,
            // 0 is the feed's "unspecified color"
            color_id: self.color_id.filter(|&c| c != 0),
            remote_url: non_empty(self.remote_url),
            spec_name: self.spec_name,
            local_path: None,
            asset_state: AssetState::Pending,
        })
    }
}

impl Resolve for RawPanoramaColor {
    type Output = PanoramaColor;

    fn resolve(self) -> Result<PanoramaColor, KeyResolutionError> {
        let id = self
            .id
            .ok_or_else(|| missing(EntityKind::PanoramaColor, "id"))?;
        let color_id = self
            .color_id
            .ok_or_else(|| missing(EntityKind::PanoramaColor, "color_id"))?;
        Ok(PanoramaColor {
            id,
            spec_id: self.spec_id,
            ext_id: self.ext_id,
            base_color_name: self.base_color_name,
            color_name: self.color_name.unwrap_or_default(),
            color_value: self.color_value,
            color_id,
        })
    }
}

impl Resolve for RawPanoramaFrame {
    type Output = PanoramaPhoto;

    fn resolve(self) -> Result<PanoramaPhoto, KeyResolutionError> {
        let seq = self
            .seq
            .ok_or_else(|| missing(EntityKind::PanoramaPhoto, "seq"))?;
        if seq < 0 {
            return Err(KeyResolutionError::InvalidField {
                kind: EntityKind::PanoramaPhoto,
                field: "seq",
                reason: format!("sequence must not be negative, got {seq}"),
            });
        }
        Ok(PanoramaPhoto {
            seq,
            spec_id: self.spec_id,
            color_id: self.color_id,
            remote_url: non_empty(self.remote_url),
            local_path: None,
            asset_state: AssetState::Pending,
        })
    }
}
