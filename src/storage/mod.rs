//! Storage Layer - SQLite-backed spatial store
//!
//! System of record is one SQLite table:
//! - city_objects(id, layer_name, properties, geometry, srid)
//!
//! Every connection gets the `ST_*` function surface registered (see [`spatial`]),
//! so generated SQL can use GeoJSON construction/extraction and spatial predicates.

pub mod schema;
pub mod spatial;
pub mod sqlite;

pub use sqlite::{LayerStats, NewSpatialObject, SqliteStore};
