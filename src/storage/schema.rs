//! Database schema definitions

/// Name of the unified spatial table every layer is loaded into
pub const SPATIAL_TABLE: &str = "city_objects";

/// SQL to create the unified spatial table.
///
/// `properties` holds a JSON object whose keys vary per layer. `geometry` holds
/// normalized GeoJSON produced by `ST_GeomFromGeoJSON`; `srid` is pinned to 4326.
pub const CREATE_CITY_OBJECTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS city_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    layer_name TEXT NOT NULL,
    properties TEXT CHECK (properties IS NULL OR json_valid(properties)),
    geometry TEXT NOT NULL,
    srid INTEGER NOT NULL DEFAULT 4326 CHECK (srid = 4326)
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_city_objects_layer ON city_objects(layer_name)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_CITY_OBJECTS_TABLE];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
