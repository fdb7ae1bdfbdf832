//! SQLite storage implementation

use std::path::Path;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use crate::Result;
use super::{schema, spatial};

/// Insert statement shared by every batch. Geometry goes through the same
/// GeoJSON constructor generated SQL would use, with SRID pinned to 4326.
const INSERT_OBJECT: &str = r#"
INSERT INTO city_objects (layer_name, properties, geometry, srid)
VALUES (?1, ?2, ST_SetSRID(ST_GeomFromGeoJSON(?3), 4326), 4326)
"#;

/// A row waiting to be inserted
#[derive(Debug, Clone)]
pub struct NewSpatialObject {
    pub layer_name: String,
    pub properties: Map<String, Value>,
    /// GeoJSON geometry text, already in SRID 4326
    pub geometry: String,
}

/// SQLite-backed spatial store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Register the spatial functions and create the schema
    fn initialize(&self) -> Result<()> {
        spatial::register_functions(&self.conn)?;
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    /// Raw connection, for executing caller-supplied SQL
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Write Operations ==========

    /// Insert one batch of rows in a single transaction.
    ///
    /// Either the whole batch commits or none of it does; earlier batches are
    /// unaffected by a failure here.
    pub fn insert_batch(&mut self, rows: &[NewSpatialObject]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_OBJECT)?;
            for row in rows {
                let properties = serde_json::to_string(&row.properties)?;
                stmt.execute(params![row.layer_name, properties, row.geometry])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Delete every row of a layer, returning how many were removed.
    ///
    /// Ingestion never deduplicates; call this before re-importing a layer.
    pub fn clear_layer(&self, layer_name: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM city_objects WHERE layer_name = ?1", [layer_name])?;
        Ok(removed)
    }

    // ========== Introspection ==========

    /// Distinct layer names in lexicographic order
    pub fn layer_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT layer_name FROM city_objects ORDER BY layer_name")?;

        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(names)
    }

    /// Properties of one representative row (the oldest) of a layer.
    ///
    /// Keys come back in the order they were stored. Returns `None` for an unknown
    /// layer and an empty map when the row has no properties.
    pub fn sample_properties(&self, layer_name: &str) -> Result<Option<Map<String, Value>>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT properties FROM city_objects WHERE layer_name = ?1 ORDER BY id LIMIT 1",
                [layer_name],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(None) => Ok(Some(Map::new())),
            Some(Some(text)) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => Ok(Some(map)),
                _ => Ok(Some(Map::new())),
            },
        }
    }

    /// Up to `limit` distinct non-null values of `properties->>key` within a layer,
    /// in database order, rendered as text.
    pub fn distinct_property_values(
        &self,
        layer_name: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT properties ->> ?1 AS val
            FROM city_objects
            WHERE layer_name = ?2
              AND properties ->> ?1 IS NOT NULL
            LIMIT ?3
            "#,
        )?;

        let values = stmt
            .query_map(params![key, layer_name, limit as i64], |row| {
                Ok(value_ref_to_text(row.get_ref(0)?))
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(values)
    }

    /// Count rows of one layer
    pub fn count_layer(&self, layer_name: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM city_objects WHERE layer_name = ?1",
            [layer_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Count all rows
    pub fn count_objects(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM city_objects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Row counts per layer, ordered by layer name
    pub fn stats(&self) -> Result<LayerStats> {
        let mut stmt = self.conn.prepare(
            "SELECT layer_name, COUNT(*) FROM city_objects GROUP BY layer_name ORDER BY layer_name",
        )?;

        let layers = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok((row.get::<_, String>(0)?, count as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(LayerStats {
            total: layers.iter().map(|(_, n)| n).sum(),
            layers,
        })
    }

    /// Stored GeoJSON geometries of a layer, in insertion order
    pub fn layer_geometries(&self, layer_name: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT ST_AsGeoJSON(geometry) FROM city_objects WHERE layer_name = ?1 ORDER BY id",
        )?;

        let geometries = stmt
            .query_map([layer_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(geometries)
    }
}

/// Render a scalar cell as text the way it would appear in a `->>` result
pub(crate) fn value_ref_to_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

/// Per-layer row counts
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerStats {
    pub total: usize,
    pub layers: Vec<(String, usize)>,
}

impl std::fmt::Display for LayerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} rows in city_objects.", self.total)?;
        writeln!(f, "Layer counts:")?;
        for (layer, count) in &self.layers {
            writeln!(f, "  - {}: {}", layer, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(layer: &str, properties: Value, x: f64, y: f64) -> NewSpatialObject {
        let Value::Object(properties) = properties else {
            panic!("properties must be an object");
        };
        NewSpatialObject {
            layer_name: layer.to_string(),
            properties,
            geometry: format!(r#"{{"type":"Point","coordinates":[{},{}]}}"#, x, y),
        }
    }

    #[test]
    fn test_insert_and_count() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let rows = vec![
            object("Parks", json!({"d_FKT": "Schwimmbad"}), 13.4, 52.5),
            object("Parks", json!({"d_FKT": "Spielplatz"}), 13.5, 52.5),
            object("Trees", json!({"ART": "Linde"}), 13.3, 52.4),
        ];
        assert_eq!(store.insert_batch(&rows).unwrap(), 3);

        assert_eq!(store.count_objects().unwrap(), 3);
        assert_eq!(store.count_layer("Parks").unwrap(), 2);
        assert_eq!(store.layer_names().unwrap(), vec!["Parks", "Trees"]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.layers[0], ("Parks".to_string(), 2));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_batch(&[
                object("A", json!({}), 0.0, 0.0),
                object("A", json!({}), 1.0, 1.0),
            ])
            .unwrap();

        let ids: Vec<i64> = store
            .connection()
            .prepare("SELECT id FROM city_objects ORDER BY rowid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_invalid_geometry_fails_whole_batch() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut bad = object("A", json!({}), 0.0, 0.0);
        bad.geometry = "{\"type\":\"Point\"}".to_string();

        let result = store.insert_batch(&[object("A", json!({}), 1.0, 1.0), bad]);
        assert!(result.is_err());
        assert_eq!(store.count_objects().unwrap(), 0);
    }

    #[test]
    fn test_sample_properties_preserves_key_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_batch(&[object(
                "Parks",
                json!({"d_MAT": "concrete", "d_FKT": "Schwimmbad", "NAM": "Nord"}),
                0.0,
                0.0,
            )])
            .unwrap();

        let props = store.sample_properties("Parks").unwrap().unwrap();
        let keys: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["d_MAT", "d_FKT", "NAM"]);

        assert!(store.sample_properties("Missing").unwrap().is_none());
    }

    #[test]
    fn test_distinct_values_skip_nulls_and_respect_limit() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut rows: Vec<_> = (0..12)
            .map(|i| object("Parks", json!({"d_FKT": format!("kind-{}", i % 10)}), 0.0, 0.0))
            .collect();
        rows.push(object("Parks", json!({"d_FKT": null}), 0.0, 0.0));
        rows.push(object("Parks", json!({"other": 1}), 0.0, 0.0));
        rows.push(object("Other", json!({"d_FKT": "elsewhere"}), 0.0, 0.0));
        store.insert_batch(&rows).unwrap();

        let values = store.distinct_property_values("Parks", "d_FKT", 8).unwrap();
        assert_eq!(values.len(), 8);
        assert!(values.iter().all(|v| v.starts_with("kind-")));

        let all = store.distinct_property_values("Parks", "d_FKT", 100).unwrap();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_clear_layer() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_batch(&[
                object("A", json!({}), 0.0, 0.0),
                object("B", json!({}), 0.0, 0.0),
            ])
            .unwrap();

        assert_eq!(store.clear_layer("A").unwrap(), 1);
        assert_eq!(store.layer_names().unwrap(), vec!["B"]);
    }
}
