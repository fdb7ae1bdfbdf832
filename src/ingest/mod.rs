//! Shapefile Ingestion - directory of triads → `city_objects`
//!
//! Each layer is a `<name>.shp` / `<name>.dbf` / `<name>.prj` triad. Per layer:
//!
//! 1. the three files are read concurrently;
//! 2. shapes and DBF records are paired by position;
//! 3. geometry is reprojected to SRID 4326 and validated, bad features are skipped;
//! 4. rows are inserted in fixed-size batches, one transaction each.
//!
//! A failing layer is reported and logged; the remaining layers still load.
//! Nothing is deduplicated, re-seeding appends.

pub mod attributes;
pub mod progress;
pub mod projection;

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crossbeam::channel::Sender;
use geo::{CoordsIter, Geometry};
use serde::Serialize;
use shapefile::dbase;
use shapefile::{Shape, ShapeReader};

use crate::storage::spatial::geometry_to_geojson;
use crate::storage::{NewSpatialObject, SqliteStore};
use crate::{Error, Result};

pub use progress::ProgressMessage;
pub use projection::{Projection, Reprojector, TransverseMercator};

/// Rows per insert transaction
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// One shapefile triad found on disk
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSource {
    /// File stem, used as `layer_name`
    pub name: String,
    pub shp: PathBuf,
    pub dbf: PathBuf,
    pub prj: PathBuf,
}

impl LayerSource {
    /// Describe the triad for a `.shp` path; companions share its stem
    pub fn from_shp(shp: &Path) -> Self {
        let name = shp
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            dbf: companion(shp, "dbf"),
            prj: companion(shp, "prj"),
            shp: shp.to_path_buf(),
        }
    }
}

/// `<stem>.<ext>`, falling back to the upper-case extension when only that exists
fn companion(shp: &Path, ext: &str) -> PathBuf {
    let lower = shp.with_extension(ext);
    if lower.exists() {
        return lower;
    }
    let upper = shp.with_extension(ext.to_ascii_uppercase());
    if upper.exists() { upper } else { lower }
}

/// Outcome of loading one layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerReport {
    pub layer: String,
    /// Features found in the shapefile
    pub features: usize,
    /// Rows committed to the store
    pub inserted: usize,
    /// Features skipped for invalid geometry
    pub invalid: usize,
    /// Why the layer stopped early, if it did
    pub error: Option<String>,
}

impl LayerReport {
    fn new(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of seeding a directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub layers: Vec<LayerReport>,
}

impl IngestSummary {
    pub fn inserted(&self) -> usize {
        self.layers.iter().map(|l| l.inserted).sum()
    }

    pub fn invalid(&self) -> usize {
        self.layers.iter().map(|l| l.invalid).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &LayerReport> {
        self.layers.iter().filter(|l| !l.is_success())
    }
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed().count();
        writeln!(
            f,
            "Seeded {} layers: {} rows inserted, {} invalid features skipped, {} layers failed",
            self.layers.len(),
            self.inserted(),
            self.invalid(),
            failed
        )?;
        for report in &self.layers {
            match &report.error {
                None => writeln!(
                    f,
                    "  - {}: {}/{} rows",
                    report.layer, report.inserted, report.features
                )?,
                Some(e) => writeln!(f, "  - {}: FAILED ({})", report.layer, e)?,
            }
        }
        Ok(())
    }
}

/// Loads shapefile layers into a [`SqliteStore`]
pub struct ShapefileIngestor {
    batch_size: usize,
    progress: Option<Sender<ProgressMessage>>,
}

impl Default for ShapefileIngestor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl ShapefileIngestor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            progress: None,
        }
    }

    /// Report progress on `tx` while ingesting
    pub fn with_progress(mut self, tx: Sender<ProgressMessage>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Find every `*.shp` in `dir` (case-insensitive), sorted by file name
    pub async fn discover_layers(dir: &Path) -> Result<Vec<LayerSource>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut shapefiles = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_shp = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("shp"))
                .unwrap_or(false);
            if is_shp && entry.file_type().await?.is_file() {
                shapefiles.push(path);
            }
        }

        shapefiles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(shapefiles.iter().map(|p| LayerSource::from_shp(p)).collect())
    }

    /// Ingest every layer in `dir`.
    ///
    /// Only a failure to list the directory is an error; per-layer failures are
    /// recorded in the summary.
    pub async fn ingest_dir(&self, store: &mut SqliteStore, dir: &Path) -> Result<IngestSummary> {
        let sources = Self::discover_layers(dir).await?;
        tracing::info!("Found {} shapefile layers in {}", sources.len(), dir.display());

        let mut summary = IngestSummary::default();
        for source in &sources {
            summary.layers.push(self.ingest_layer(store, source).await);
        }
        Ok(summary)
    }

    /// Ingest one layer, never failing the caller
    pub async fn ingest_layer(&self, store: &mut SqliteStore, source: &LayerSource) -> LayerReport {
        let mut report = LayerReport::new(&source.name);
        tracing::info!("Processing layer: {}", source.name);

        match self.load_layer(store, source, &mut report).await {
            Ok(()) => {
                tracing::info!(
                    "Imported layer {} ({} rows, {} invalid skipped)",
                    source.name,
                    report.inserted,
                    report.invalid
                );
                self.send(ProgressMessage::LayerFinished {
                    layer: source.name.clone(),
                    inserted: report.inserted,
                });
            }
            Err(e) => {
                tracing::error!("Failed to import layer {}: {}", source.name, e);
                report.error = Some(e.to_string());
                self.send(ProgressMessage::LayerFailed {
                    layer: source.name.clone(),
                    error: e.to_string(),
                });
            }
        }

        report
    }

    async fn load_layer(
        &self,
        store: &mut SqliteStore,
        source: &LayerSource,
        report: &mut LayerReport,
    ) -> Result<()> {
        let layer = source.name.as_str();
        for path in [&source.dbf, &source.prj] {
            if !path.exists() {
                return Err(Error::MissingCompanion {
                    layer: layer.to_string(),
                    path: path.display().to_string(),
                });
            }
        }

        let (shp, dbf, prj) = tokio::try_join!(
            tokio::fs::read(&source.shp),
            tokio::fs::read(&source.dbf),
            tokio::fs::read_to_string(&source.prj),
        )?;

        let shapes = parse_shapes(layer, shp)?;
        let (fields, records) = parse_records(layer, dbf)?;
        if shapes.len() != records.len() {
            return Err(Error::Combine {
                layer: layer.to_string(),
                shapes: shapes.len(),
                records: records.len(),
            });
        }
        report.features = shapes.len();

        let reprojector = Reprojector::from_prj(&prj)?;

        let mut rows = Vec::with_capacity(shapes.len());
        for (index, (shape, record)) in shapes.into_iter().zip(records.iter()).enumerate() {
            match to_geojson(shape, &reprojector) {
                Ok(geometry) => rows.push(NewSpatialObject {
                    layer_name: layer.to_string(),
                    properties: attributes::record_to_properties(&fields, record),
                    geometry,
                }),
                Err(reason) => {
                    tracing::warn!("Skipping invalid geometry in {} at index {}: {}", layer, index, reason);
                    report.invalid += 1;
                }
            }
        }

        self.send(ProgressMessage::LayerStarted {
            layer: layer.to_string(),
            total: rows.len(),
        });

        for batch in rows.chunks(self.batch_size) {
            report.inserted += store.insert_batch(batch)?;
            tracing::debug!("Committed {}/{} rows of {}", report.inserted, rows.len(), layer);
            self.send(ProgressMessage::Inserted {
                layer: layer.to_string(),
                inserted: report.inserted,
                total: rows.len(),
            });
        }

        Ok(())
    }

    fn send(&self, msg: ProgressMessage) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(msg);
        }
    }
}

// ========== Parsing ==========

fn parse_shapes(layer: &str, bytes: Vec<u8>) -> Result<Vec<Shape>> {
    ShapeReader::new(Cursor::new(bytes))
        .and_then(|mut reader| reader.read())
        .map_err(|e| Error::Shapefile {
            layer: layer.to_string(),
            message: e.to_string(),
        })
}

fn parse_records(layer: &str, bytes: Vec<u8>) -> Result<(Vec<String>, Vec<dbase::Record>)> {
    let dbf_error = |e: dbase::Error| Error::Shapefile {
        layer: layer.to_string(),
        message: format!("dbf: {}", e),
    };

    let mut reader = dbase::Reader::new(Cursor::new(bytes)).map_err(dbf_error)?;
    let fields = reader
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .filter(|name| name != "DeletionFlag")
        .collect();
    let records = reader.read().map_err(dbf_error)?;
    Ok((fields, records))
}

/// Shape → reprojected, validated GeoJSON geometry text
fn to_geojson(shape: Shape, reprojector: &Reprojector) -> std::result::Result<String, String> {
    let kind = shape.shapetype();
    let geometry = Geometry::<f64>::try_from(shape)
        .map_err(|e| format!("unsupported {:?} shape: {}", kind, e))?;
    if geometry.coords_count() == 0 {
        return Err("empty geometry".to_string());
    }

    let geometry = reprojector.reproject(&geometry).map_err(|e| e.to_string())?;
    if geometry.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err("non-finite coordinate after reprojection".to_string());
    }

    geometry_to_geojson(&geometry).map_err(|e| e.to_string())
}
