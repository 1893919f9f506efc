//! Catalog entities
//!
//! Ten record types in a strict ownership tree. Every child carries the identifier of its parent
//! so the SQLite schema can enforce the relationship with foreign keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteRow, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, FromRow, Sqlite, Type};

use crate::domain::keys::{
    BrandKey, EntityKey, PanoramaColorKey, PanoramaFrameKey, ParamTitleKey, ParamValueKey,
    PhotoCategoryKey, PhotoColorKey, PhotoKey, SeriesKey, SpecKey,
};
use crate::domain::media::AssetState;

/// Entity type tag, one per stored table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Brand,
    Series,
    Specification,
    ParamTitle,
    ParamValue,
    PhotoColor,
    PhotoCategory,
    Photo,
    PanoramaColor,
    PanoramaPhoto,
}

impl EntityKind {
    /// Parent-first order.
    pub const ALL: [Self; 10] = [
        Self::Brand,
        Self::Series,
        Self::Specification,
        Self::ParamTitle,
        Self::ParamValue,
        Self::PhotoColor,
        Self::PhotoCategory,
        Self::Photo,
        Self::PanoramaColor,
        Self::PanoramaPhoto,
    ];

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Brand => "brands",
            Self::Series => "series",
            Self::Specification => "specifications",
            Self::ParamTitle => "param_titles",
            Self::ParamValue => "param_values",
            Self::PhotoColor => "photo_colors",
            Self::PhotoCategory => "photo_categories",
            Self::Photo => "photos",
            Self::PanoramaColor => "panorama_colors",
            Self::PanoramaPhoto => "panorama_photos",
        }
    }

    #[must_use]
    pub const fn key_columns(self) -> &'static [&'static str] {
        match self {
            Self::Brand
            | Self::Series
            | Self::Specification
            | Self::PhotoColor
            | Self::Photo
            | Self::PanoramaColor => &["id"],
            Self::ParamTitle => &["series_id", "title_id"],
            Self::ParamValue => &["spec_id", "title_id", "item_name", "sub_name"],
            Self::PhotoCategory => &["series_id", "category_id"],
            Self::PanoramaPhoto => &["seq", "spec_id", "color_id"],
        }
    }

    /// Non-key columns, in the order of [`Record::fields`].
    #[must_use]
    pub const fn field_columns(self) -> &'static [&'static str] {
        match self {
            Self::Brand => &["name", "logo_url"],
            Self::Series => &["brand_id", "name", "is_new_energy"],
            Self::Specification => &["series_id", "name", "min_price"],
            Self::ParamTitle => &["item_name", "group_name", "item_type"],
            Self::ParamValue => &["series_id", "value"],
            Self::PhotoColor => &["series_id", "color_type", "name", "value", "is_on_sale"],
            Self::PhotoCategory => &["name"],
            Self::Photo => &[
                "series_id",
                "spec_id",
                "category_id",
                "color_id",
                "remote_url",
                "spec_name",
                "local_path",
                "asset_state",
            ],
            Self::PanoramaColor => &[
                "spec_id",
                "ext_id",
                "base_color_name",
                "color_name",
                "color_value",
                "color_id",
            ],
            Self::PanoramaPhoto => &["remote_url", "local_path", "asset_state"],
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Series => "series",
            Self::Specification => "specification",
            Self::ParamTitle => "param_title",
            Self::ParamValue => "param_value",
            Self::PhotoColor => "photo_color",
            Self::PhotoCategory => "photo_category",
            Self::Photo => "photo",
            Self::PanoramaColor => "panorama_color",
            Self::PanoramaPhoto => "panorama_photo",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A column value as bound into, and compared against, the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(Option<i64>),
    Text(Option<String>),
    Bool(Option<bool>),
}

impl SqlValue {
    #[must_use]
    pub const fn int(value: i64) -> Self {
        Self::Int(Some(value))
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(Some(value.into()))
    }
}

/// A stored entity with a canonical key.
pub trait Record:
    for<'r> FromRow<'r, SqliteRow> + Clone + fmt::Debug + PartialEq + Send + Sync + Unpin + 'static
{
    type Key: EntityKey;

    const KIND: EntityKind;

    fn key(&self) -> Self::Key;

    /// Non-key column values, in the order of [`EntityKind::field_columns`].
    fn fields(&self) -> Vec<SqlValue>;

    /// Folds state the feed does not carry into an incoming record before it is compared
    /// against the stored one.
    fn merge_stored(&mut self, _stored: &Self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Brand {
    pub id: i64,
    pub name: String,
    pub logo_url: Option<String>,
}

impl Record for Brand {
    type Key = BrandKey;
    const KIND: EntityKind = EntityKind::Brand;

    fn key(&self) -> BrandKey {
        BrandKey(self.id)
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(self.name.clone()),
            SqlValue::Text(self.logo_url.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Series {
    pub id: i64,
    pub brand_id: i64,
    pub name: String,
    pub is_new_energy: Option<bool>,
}

impl Record for Series {
    type Key = SeriesKey;
    const KIND: EntityKind = EntityKind::Series;

    fn key(&self) -> SeriesKey {
        SeriesKey(self.id)
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.brand_id),
            SqlValue::text(self.name.clone()),
            SqlValue::Bool(self.is_new_energy),
        ]
    }

    // once observed true the flag stays true
    fn merge_stored(&mut self, stored: &Self) {
        if stored.is_new_energy == Some(true) {
            self.is_new_energy = Some(true);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Specification {
    pub id: i64,
    pub series_id: i64,
    pub name: String,
    /// Display string as published, e.g. "15.98万".
    pub min_price: Option<String>,
}

impl Record for Specification {
    type Key = SpecKey;
    const KIND: EntityKind = EntityKind::Specification;

    fn key(&self) -> SpecKey {
        SpecKey(self.id)
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.series_id),
            SqlValue::text(self.name.clone()),
            SqlValue::Text(self.min_price.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ParamTitle {
    pub series_id: i64,
    pub title_id: i64,
    pub item_name: String,
    pub group_name: Option<String>,
    pub item_type: Option<String>,
}

impl Record for ParamTitle {
    type Key = ParamTitleKey;
    const KIND: EntityKind = EntityKind::ParamTitle;

    fn key(&self) -> ParamTitleKey {
        ParamTitleKey {
            series_id: self.series_id,
            title_id: self.title_id,
        }
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(self.item_name.clone()),
            SqlValue::Text(self.group_name.clone()),
            SqlValue::Text(self.item_type.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ParamValue {
    pub spec_id: i64,
    pub title_id: i64,
    pub item_name: String,
    pub sub_name: String,
    /// Scope of `title_id`; together they reference the owning [`ParamTitle`].
    pub series_id: i64,
    pub value: Option<String>,
}

impl Record for ParamValue {
    type Key = ParamValueKey;
    const KIND: EntityKind = EntityKind::ParamValue;

    fn key(&self) -> ParamValueKey {
        ParamValueKey {
            spec_id: self.spec_id,
            title_id: self.title_id,
            item_name: self.item_name.clone(),
            sub_name: self.sub_name.clone(),
        }
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.series_id),
            SqlValue::Text(self.value.clone()),
        ]
    }
}

/// Which palette a photo color belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorType {
    Exterior,
    Interior,
}

impl ColorType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exterior => "exterior",
            Self::Interior => "interior",
        }
    }

    #[must_use]
    pub const fn is_interior(self) -> bool {
        matches!(self, Self::Interior)
    }
}

impl fmt::Display for ColorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<Sqlite> for ColorType {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <String as Type<Sqlite>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Sqlite> for ColorType {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<Sqlite>>::decode(value)?;
        match s.as_str() {
            "exterior" => Ok(Self::Exterior),
            "interior" => Ok(Self::Interior),
            _ => Err(format!("Invalid ColorType: {s}").into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PhotoColor {
    pub id: i64,
    pub series_id: i64,
    pub color_type: ColorType,
    pub name: String,
    /// Hex swatch, e.g. "#FFFFFF".
    pub value: Option<String>,
    pub is_on_sale: Option<bool>,
}

impl Record for PhotoColor {
    type Key = PhotoColorKey;
    const KIND: EntityKind = EntityKind::PhotoColor;

    fn key(&self) -> PhotoColorKey {
        PhotoColorKey(self.id)
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.series_id),
            SqlValue::text(self.color_type.as_str()),
            SqlValue::text(self.name.clone()),
            SqlValue::Text(self.value.clone()),
            SqlValue::Bool(self.is_on_sale),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PhotoCategory {
    pub series_id: i64,
    pub category_id: i64,
    pub name: String,
}

impl Record for PhotoCategory {
    type Key = PhotoCategoryKey;
    const KIND: EntityKind = EntityKind::PhotoCategory;

    fn key(&self) -> PhotoCategoryKey {
        PhotoCategoryKey {
            series_id: self.series_id,
            category_id: self.category_id,
        }
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![SqlValue::text(self.name.clone())]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Photo {
    pub id: String,
    pub series_id: i64,
    pub spec_id: i64,
    pub category_id: i64,
    /// `None` is the feed's color id 0.
    pub color_id: Option<i64>,
    pub remote_url: Option<String>,
    pub spec_name: Option<String>,
    pub local_path: Option<String>,
    pub asset_state: AssetState,
}

impl Record for Photo {
    type Key = PhotoKey;
    const KIND: EntityKind = EntityKind::Photo;

    fn key(&self) -> PhotoKey {
        PhotoKey(self.id.clone())
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.series_id),
            SqlValue::int(self.spec_id),
            SqlValue::int(self.category_id),
            SqlValue::Int(self.color_id),
            SqlValue::Text(self.remote_url.clone()),
            SqlValue::Text(self.spec_name.clone()),
            SqlValue::Text(self.local_path.clone()),
            SqlValue::text(self.asset_state.as_str()),
        ]
    }

    fn merge_stored(&mut self, stored: &Self) {
        if self.local_path.is_none() && self.remote_url == stored.remote_url {
            self.local_path.clone_from(&stored.local_path);
            self.asset_state = stored.asset_state;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PanoramaColor {
    pub id: i64,
    pub spec_id: i64,
    /// Watermark: id of the remote frame set last listed for this color.
    pub ext_id: Option<i64>,
    pub base_color_name: Option<String>,
    pub color_name: String,
    pub color_value: Option<String>,
    pub color_id: i64,
}

impl Record for PanoramaColor {
    type Key = PanoramaColorKey;
    const KIND: EntityKind = EntityKind::PanoramaColor;

    fn key(&self) -> PanoramaColorKey {
        PanoramaColorKey(self.id)
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::int(self.spec_id),
            SqlValue::Int(self.ext_id),
            SqlValue::Text(self.base_color_name.clone()),
            SqlValue::text(self.color_name.clone()),
            SqlValue::Text(self.color_value.clone()),
            SqlValue::int(self.color_id),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PanoramaPhoto {
    pub seq: i64,
    pub spec_id: i64,
    pub color_id: i64,
    pub remote_url: Option<String>,
    pub local_path: Option<String>,
    pub asset_state: AssetState,
}

impl Record for PanoramaPhoto {
    type Key = PanoramaFrameKey;
    const KIND: EntityKind = EntityKind::PanoramaPhoto;

    fn key(&self) -> PanoramaFrameKey {
        PanoramaFrameKey {
            seq: self.seq,
            spec_id: self.spec_id,
            color_id: self.color_id,
        }
    }

    fn fields(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.remote_url.clone()),
            SqlValue::Text(self.local_path.clone()),
            SqlValue::text(self.asset_state.as_str()),
        ]
    }

    fn merge_stored(&mut self, stored: &Self) {
        if self.local_path.is_none() && self.remote_url == stored.remote_url {
            self.local_path.clone_from(&stored.local_path);
            self.asset_state = stored.asset_state;
        }
    }
}
