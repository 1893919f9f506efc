//! Domain module - catalog entities, canonical keys and media assets
//!
//! Everything here is free of I/O. The store and the orchestrator build on these types.

pub mod entities;
pub mod keys;
pub mod media;

pub use entities::{
    Brand, ColorType, EntityKind, PanoramaColor, PanoramaPhoto, ParamTitle, ParamValue, Photo,
    PhotoCategory, PhotoColor, Record, Series, Specification, SqlValue,
};
pub use keys::{EntityKey, KeyResolutionError, Resolve};
pub use media::{AssetKey, AssetState, MediaRecord};
