//! autocat-sync - incremental sync and dedup engine for a hierarchical automotive catalog
//!
//! The feed (brands, series, specifications, parameters, color palettes, photos and panorama
//! frame sets) is materialized into a normalized SQLite store under composite keys, and the
//! media it references is downloaded to local storage exactly once.

pub mod crawling;
pub mod domain;
pub mod infrastructure;
