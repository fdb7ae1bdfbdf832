//! Schema Context - grounding vocabulary discovered from the live store
//!
//! For every layer (sorted by name) the generator picks one filter key and a handful
//! of its distinct values, then renders them one line per layer:
//!
//! ```text
//! - Layer: 'Parks' | Filter Column: 'd_FKT' | Sample Values: 'Schwimmbad', 'Spielplatz'
//! - Layer: 'Trees' | No specific filter column found.
//! ```
//!
//! Keys are read from a single representative row per layer (the oldest). Keys that
//! only appear on later rows of a heterogeneous layer are not seen.
//!
//! The context is regenerated on every call and never cached.

pub mod rules;

use std::fmt;

use serde::Serialize;

use crate::config::GroundingConfig;
use crate::storage::SqliteStore;
use crate::Result;

pub use rules::{FilterKeyRules, KeyRule};

/// Grounding for one layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaContextEntry {
    pub layer_name: String,
    pub filter_key: Option<String>,
    /// Distinct non-null values of the filter key, in database order
    pub sample_values: Vec<String>,
}

impl fmt::Display for SchemaContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter_key {
            Some(key) => {
                let values = self
                    .sample_values
                    .iter()
                    .map(|v| format!("'{}'", v))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "- Layer: '{}' | Filter Column: '{}' | Sample Values: {}",
                    self.layer_name, key, values
                )
            }
            None => write!(
                f,
                "- Layer: '{}' | No specific filter column found.",
                self.layer_name
            ),
        }
    }
}

/// The rendered grounding block, one entry per layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaContext {
    pub entries: Vec<SchemaContextEntry>,
}

impl SchemaContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.layer_name.as_str())
    }
}

impl fmt::Display for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// Builds a [`SchemaContext`] from the store
#[derive(Debug, Clone)]
pub struct SchemaContextGenerator {
    rules: FilterKeyRules,
    sample_limit: usize,
}

impl SchemaContextGenerator {
    pub fn new(rules: FilterKeyRules, sample_limit: usize) -> Self {
        Self { rules, sample_limit }
    }

    pub fn from_config(config: &GroundingConfig) -> Result<Self> {
        Ok(Self::new(FilterKeyRules::from_config(config)?, config.sample_limit))
    }

    /// Introspect every layer. Store errors propagate; an empty store is an
    /// empty context.
    pub fn generate(&self, store: &SqliteStore) -> Result<SchemaContext> {
        let mut entries = Vec::new();

        for layer_name in store.layer_names()? {
            let entry = self.describe_layer(store, layer_name)?;
            tracing::debug!("Context entry: {}", entry);
            entries.push(entry);
        }

        Ok(SchemaContext { entries })
    }

    fn describe_layer(&self, store: &SqliteStore, layer_name: String) -> Result<SchemaContextEntry> {
        let properties = store.sample_properties(&layer_name)?.unwrap_or_default();
        let keys: Vec<&str> = properties.keys().map(String::as_str).collect();

        let filter_key = self.rules.select_filter_key(&keys).map(str::to_string);
        let sample_values = match &filter_key {
            Some(key) => store.distinct_property_values(&layer_name, key, self.sample_limit)?,
            None => Vec::new(),
        };

        Ok(SchemaContextEntry {
            layer_name,
            filter_key,
            sample_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewSpatialObject;
    use serde_json::{Value, json};

    fn row(layer: &str, properties: Value) -> NewSpatialObject {
        let Value::Object(properties) = properties else {
            panic!("properties must be an object");
        };
        NewSpatialObject {
            layer_name: layer.to_string(),
            properties,
            geometry: r#"{"type":"Point","coordinates":[13.4,52.5]}"#.to_string(),
        }
    }

    fn generator() -> SchemaContextGenerator {
        SchemaContextGenerator::from_config(&GroundingConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_store_renders_empty_block() {
        let store = SqliteStore::open_in_memory().unwrap();
        let context = generator().generate(&store).unwrap();
        assert!(context.is_empty());
        assert_eq!(context.to_string(), "");
    }

    #[test]
    fn test_entry_line_format() {
        let context = SchemaContext {
            entries: vec![
                SchemaContextEntry {
                    layer_name: "Pools".to_string(),
                    filter_key: Some("d_FKT".to_string()),
                    sample_values: vec!["Hallenbad".to_string(), "Freibad".to_string()],
                },
                SchemaContextEntry {
                    layer_name: "Trees".to_string(),
                    filter_key: None,
                    sample_values: Vec::new(),
                },
            ],
        };

        assert_eq!(
            context.to_string(),
            "- Layer: 'Pools' | Filter Column: 'd_FKT' | Sample Values: 'Hallenbad', 'Freibad'\n\
             - Layer: 'Trees' | No specific filter column found."
        );
    }

    #[test]
    fn test_generate_from_store() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_batch(&[
                row("Trees", json!({"gml_id": "t1"})),
                row("Pools", json!({"d_MAT": "Beton", "d_FKT": "Hallenbad"})),
                row("Pools", json!({"d_MAT": "Stahl", "d_FKT": "Freibad"})),
                row("Pools", json!({"d_MAT": "Beton", "d_FKT": "Hallenbad"})),
            ])
            .unwrap();

        let context = generator().generate(&store).unwrap();
        assert_eq!(context.layer_names().collect::<Vec<_>>(), vec!["Pools", "Trees"]);

        let pools = &context.entries[0];
        assert_eq!(pools.filter_key.as_deref(), Some("d_FKT"));
        let mut values = pools.sample_values.clone();
        values.sort();
        assert_eq!(values, vec!["Freibad", "Hallenbad"]);

        assert_eq!(context.entries[1].filter_key, None);
        assert!(context.to_string().ends_with("- Layer: 'Trees' | No specific filter column found."));
    }

    #[test]
    fn test_sample_values_are_capped() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let rows: Vec<_> = (0..20)
            .map(|i| row("Streets", json!({"NAM": format!("Straße {}", i)})))
            .collect();
        store.insert_batch(&rows).unwrap();

        let context = generator().generate(&store).unwrap();
        let entry = &context.entries[0];
        assert_eq!(entry.filter_key.as_deref(), Some("NAM"));
        assert_eq!(entry.sample_values.len(), 8);
    }

    #[test]
    fn test_keys_come_from_oldest_row_only() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_batch(&[
                row("Mixed", json!({"gml_id": "a"})),
                row("Mixed", json!({"NAM": "later"})),
            ])
            .unwrap();

        let context = generator().generate(&store).unwrap();
        assert_eq!(context.entries[0].filter_key, None);
    }
}
