//! Grounded query generation
//!
//! The model only ever sees one table, the schema context, and a fixed rule set. It
//! answers through [`StructuredGenerator`] with a `{"sql": "..."}` payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::SchemaContext;
use crate::{Error, Result};

/// Narrow seam to a language model: a system prompt and a user prompt in, the raw
/// structured payload (expected `{"sql": "<string>"}`) out.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String>;
}

/// A natural-language request and the SQL produced for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuery {
    pub prompt: String,
    pub sql: String,
}

const TABLE_DESCRIPTION: &str = "\
You translate questions about a city's geodata into one SQL query.

The database has a single table, city_objects:
- id: integer primary key
- layer_name: text, the dataset a row belongs to
- properties: JSON object with the dataset's attributes, read a key with properties ->> 'KEY'
- geometry: geometry in SRID 4326 (longitude, latitude)";

const RULES: &str = "\
Rules:
1. Return exactly one SQL statement. No explanations, no markdown, no code fences.
2. Always select ST_AsGeoJSON(geometry) AS geojson together with properties.
3. Restrict rows with layer_name = '<Layer>' using only the layer names listed above.
4. Only use the filter columns listed above. Never guess column or attribute names.
5. Match descriptive text with a partial, case-insensitive match: properties ->> '<Filter Column>' LIKE '%term%'.
6. For questions about location or distance use the spatial functions ST_Contains, ST_Within, ST_Intersects, ST_DWithin, ST_Distance, ST_MakePoint and ST_MakeEnvelope. Coordinates are longitude, latitude.
7. Only query the city_objects table.
8. Respond with a JSON object of the form {\"sql\": \"<statement>\"}.";

/// System prompt for a given grounding context
pub fn system_prompt(context: &SchemaContext) -> String {
    format!(
        "{}\n\nDataset Definitions:\n{}\n\n{}",
        TABLE_DESCRIPTION, context, RULES
    )
}

/// Turns prompts into grounded SQL through a [`StructuredGenerator`]
#[derive(Clone)]
pub struct QueryGenerator {
    backend: Arc<dyn StructuredGenerator>,
}

impl QueryGenerator {
    pub fn new(backend: Arc<dyn StructuredGenerator>) -> Self {
        Self { backend }
    }

    /// Generate one SQL statement for `prompt`.
    ///
    /// Every failure is reported as [`Error::QueryGeneration`]; the underlying
    /// cause is logged here and not returned. No retry.
    pub async fn generate(&self, prompt: &str, context: &SchemaContext) -> Result<GeneratedQuery> {
        let system = system_prompt(context);
        tracing::debug!("Generating SQL for prompt: {}", prompt);
        tracing::debug!("System prompt:\n{}", system);

        let payload = match self.backend.generate(&system, prompt).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Query generation request failed: {:#}", e);
                return Err(Error::QueryGeneration);
            }
        };

        let sql = parse_payload(&payload).map_err(|cause| {
            tracing::error!("Query generation returned an unusable payload: {}", cause);
            Error::QueryGeneration
        })?;

        tracing::debug!("Generated SQL: {}", sql);
        Ok(GeneratedQuery {
            prompt: prompt.to_string(),
            sql,
        })
    }
}

/// Extract the `sql` field from a `{"sql": "..."}` payload
pub fn parse_payload(payload: &str) -> std::result::Result<String, String> {
    let body = strip_fences(payload, "json");
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("payload is not JSON: {}", e))?;

    let sql = value
        .get("sql")
        .ok_or("payload has no `sql` field")?
        .as_str()
        .ok_or("`sql` is not a string")?;

    let sql = strip_fences(sql, "sql");
    if sql.is_empty() {
        return Err("`sql` is empty".to_string());
    }
    Ok(sql.to_string())
}

/// Remove one surrounding markdown fence (optionally tagged `lang`)
fn strip_fences<'a>(text: &'a str, lang: &str) -> &'a str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix(lang).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
