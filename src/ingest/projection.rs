//! # Source projection → SRID 4326
//!
//! Every layer ships a `.prj` (OGC WKT) describing its coordinate system. Geometry is
//! reprojected to WGS84 lon/lat before it reaches the store.
//!
//! ## Pipeline
//! ```text
//! .prj WKT  →  Reprojector  →  Geometry<f64> in EPSG:4326 (x = lon, y = lat)
//! ```
//!
//! With the `proj-transforms` feature PROJ handles any CRS it understands. Without it
//! (or when PROJ rejects the definition) a built-in fallback covers the systems city
//! datasets actually ship in: geographic, Web Mercator and Transverse Mercator / UTM.
//!
//! The fallback applies no datum shift. It only accepts CRSs on a WGS84-compatible
//! ellipsoid (WGS84, GRS80) without a non-zero `TOWGS84`; Bessel-based systems such as
//! DHDN Gauss-Krüger are rejected with [`Error::Projection`] and need PROJ.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::OnceLock;

use geo::{Coord, Geometry, MapCoords};
use regex::Regex;

use crate::{Error, Result};

/// WGS84 semi-major axis in meters
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 inverse flattening
const WGS84_INV_F: f64 = 298.257_223_563;

// ============================================================================
// 1. Reprojector - what ingestion uses
// ============================================================================

/// Transforms geometry from a layer's source CRS into EPSG:4326
pub struct Reprojector {
    backend: Backend,
}

enum Backend {
    Builtin(Projection),
    #[cfg(feature = "proj-transforms")]
    Proj(proj::Proj),
}

impl Reprojector {
    /// Build a reprojector from the contents of a `.prj` file
    pub fn from_prj(wkt: &str) -> Result<Self> {
        #[cfg(feature = "proj-transforms")]
        {
            match proj::Proj::new_known_crs(wkt.trim(), "EPSG:4326", None) {
                Ok(transformer) => {
                    return Ok(Self {
                        backend: Backend::Proj(transformer),
                    });
                }
                Err(e) => {
                    tracing::debug!("PROJ rejected projection, using built-in fallback: {}", e);
                }
            }
        }

        Ok(Self {
            backend: Backend::Builtin(Projection::from_wkt(wkt)?),
        })
    }

    /// Reproject a geometry into lon/lat
    pub fn reproject(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
        match &self.backend {
            Backend::Builtin(Projection::Geographic) => Ok(geometry.clone()),
            Backend::Builtin(projection) => Ok(geometry.map_coords(|c| {
                let (x, y) = projection.to_wgs84(c.x, c.y);
                Coord { x, y }
            })),
            #[cfg(feature = "proj-transforms")]
            Backend::Proj(transformer) => geometry
                .try_map_coords(|c| {
                    transformer
                        .convert((c.x, c.y))
                        .map(|(x, y)| Coord { x, y })
                })
                .map_err(|e| Error::Projection(e.to_string())),
        }
    }
}

// ============================================================================
// 2. Built-in projections
// ============================================================================

/// Coordinate systems the built-in fallback understands
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in degrees (treated as WGS84)
    Geographic,
    /// Spherical (pseudo) Mercator, as EPSG:3857
    WebMercator { unit: f64 },
    /// Transverse Mercator on an ellipsoid (UTM, Gauss-Krüger)
    TransverseMercator(TransverseMercator),
}

impl Projection {
    /// Recognize a projection from OGC WKT (WKT1 `PROJCS`/`GEOGCS` or WKT2 `PROJCRS`/`GEOGCRS`)
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let wkt = wkt.trim();
        let root = wkt
            .split('[')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_uppercase();

        if matches!(root.as_str(), "GEOGCS" | "GEOGCRS" | "GEODCRS" | "PROJCS" | "PROJCRS") {
            require_wgs84_datum(wkt)?;
        }

        match root.as_str() {
            "GEOGCS" | "GEOGCRS" | "GEODCRS" => return Ok(Self::Geographic),
            "PROJCS" | "PROJCRS" => {}
            "" => return Err(Error::Projection("empty projection definition".to_string())),
            other => {
                return Err(Error::Projection(format!(
                    "unsupported coordinate system kind '{}'",
                    other
                )));
            }
        }

        let method = projection_method(wkt)
            .ok_or_else(|| Error::Projection("projected CRS without a PROJECTION".to_string()))?;
        let method_key = method.to_ascii_lowercase().replace([' ', '-'], "_");
        let unit = linear_unit(wkt);

        if method_key.contains("pseudo_mercator")
            || method_key.contains("mercator_auxiliary_sphere")
            || method_key.contains("popular_visualisation")
        {
            return Ok(Self::WebMercator { unit });
        }

        if method_key.contains("transverse_mercator") || method_key == "gauss_kruger" {
            let (semi_major, inverse_flattening) = ellipsoid(wkt);
            return Ok(Self::TransverseMercator(TransverseMercator {
                central_meridian: parameter(wkt, &["central_meridian", "longitude_of_natural_origin", "longitude_of_origin"])
                    .unwrap_or(0.0),
                latitude_of_origin: parameter(wkt, &["latitude_of_origin", "latitude_of_natural_origin"])
                    .unwrap_or(0.0),
                scale_factor: parameter(wkt, &["scale_factor", "scale_factor_at_natural_origin"])
                    .unwrap_or(1.0),
                false_easting: parameter(wkt, &["false_easting"]).unwrap_or(0.0),
                false_northing: parameter(wkt, &["false_northing"]).unwrap_or(0.0),
                semi_major,
                inverse_flattening,
                unit,
            }));
        }

        Err(Error::Projection(format!(
            "unsupported projection method '{}' (build with the proj-transforms feature)",
            method
        )))
    }

    /// Source coordinates → (lon, lat) in degrees
    pub fn to_wgs84(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (x, y),
            Self::WebMercator { unit } => {
                let (x, y) = (x * unit, y * unit);
                let lon = (x / WGS84_A).to_degrees();
                let lat = (2.0 * (y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees();
                (lon, lat)
            }
            Self::TransverseMercator(tm) => tm.inverse(x, y),
        }
    }

    /// (lon, lat) in degrees → source coordinates
    pub fn from_wgs84(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (lon, lat),
            Self::WebMercator { unit } => {
                let x = WGS84_A * lon.to_radians();
                let y = WGS84_A * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
                (x / unit, y / unit)
            }
            Self::TransverseMercator(tm) => tm.forward(lon, lat),
        }
    }
}

/// Transverse Mercator parameters (angles in degrees, offsets in CRS units)
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    pub central_meridian: f64,
    pub latitude_of_origin: f64,
    pub scale_factor: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    pub semi_major: f64,
    pub inverse_flattening: f64,
    /// Meters per CRS unit
    pub unit: f64,
}

/// Krüger series coefficients for one ellipsoid
struct KruegerSeries {
    /// Rectifying radius
    a_hat: f64,
    e: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl TransverseMercator {
    /// UTM zone on WGS84, e.g. `utm(33, true)` for EPSG:32633
    pub fn utm(zone: u8, north: bool) -> Self {
        Self {
            central_meridian: f64::from(zone) * 6.0 - 183.0,
            latitude_of_origin: 0.0,
            scale_factor: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
            semi_major: WGS84_A,
            inverse_flattening: WGS84_INV_F,
            unit: 1.0,
        }
    }

    fn series(&self) -> KruegerSeries {
        let f = if self.inverse_flattening > 0.0 {
            1.0 / self.inverse_flattening
        } else {
            0.0
        };
        let n = f / (2.0 - f);
        let (n2, n3) = (n * n, n * n * n);

        KruegerSeries {
            a_hat: self.semi_major / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            e: (f * (2.0 - f)).sqrt(),
            alpha: [
                n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3,
                13.0 / 48.0 * n2 - 3.0 / 5.0 * n3,
                61.0 / 240.0 * n3,
            ],
            beta: [
                n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3,
                1.0 / 48.0 * n2 + 1.0 / 15.0 * n3,
                17.0 / 480.0 * n3,
            ],
            delta: [
                2.0 * n - 2.0 / 3.0 * n2 - 2.0 * n3,
                7.0 / 3.0 * n2 - 8.0 / 5.0 * n3,
                56.0 / 15.0 * n3,
            ],
        }
    }

    /// Unscaled (ξ, η) for a lon/lat offset from the central meridian
    fn xi_eta(series: &KruegerSeries, lat: f64, dlon: f64) -> (f64, f64) {
        let sin_lat = lat.sin();
        let t = (sin_lat.atanh() - series.e * (series.e * sin_lat).atanh()).sinh();
        let xi_p = t.atan2(dlon.cos());
        let eta_p = (dlon.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in series.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }

    /// (lon, lat) degrees → (easting, northing) in CRS units
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let series = self.series();
        let k = self.scale_factor * series.a_hat;
        let (xi0, _) = Self::xi_eta(&series, self.latitude_of_origin.to_radians(), 0.0);
        let (xi, eta) = Self::xi_eta(
            &series,
            lat.to_radians(),
            (lon - self.central_meridian).to_radians(),
        );

        let easting = self.false_easting * self.unit + k * eta;
        let northing = self.false_northing * self.unit + k * (xi - xi0);
        (easting / self.unit, northing / self.unit)
    }

    /// (easting, northing) in CRS units → (lon, lat) degrees
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let series = self.series();
        let k = self.scale_factor * series.a_hat;
        let (xi0, _) = Self::xi_eta(&series, self.latitude_of_origin.to_radians(), 0.0);

        let xi = (northing - self.false_northing) * self.unit / k + xi0;
        let eta = (easting - self.false_easting) * self.unit / k;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in series.beta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut lat = chi;
        for (j, d) in series.delta.iter().enumerate() {
            lat += d * (2.0 * (j as f64 + 1.0) * chi).sin();
        }
        let dlon = eta_p.sinh().atan2(xi_p.cos());

        (self.central_meridian + dlon.to_degrees(), lat.to_degrees())
    }
}

// ============================================================================
// 3. WKT scraping
// ============================================================================

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn projection_method(wkt: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(&RE, r#"(?i)\b(?:PROJECTION|METHOD)\s*\[\s*"([^"]+)""#)?;
    re.captures(wkt).map(|c| c[1].to_string())
}

fn parameter(wkt: &str, names: &[&str]) -> Option<f64> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(&RE, r#"(?i)\bPARAMETER\s*\[\s*"([^"]+)"\s*,\s*([-+0-9.eE]+)"#)?;
    re.captures_iter(wkt).find_map(|c| {
        let name = c[1].to_ascii_lowercase().replace(' ', "_");
        if names.contains(&name.as_str()) {
            c[2].parse().ok()
        } else {
            None
        }
    })
}

/// Semi-major axis and inverse flattening, WGS84 when absent
fn ellipsoid(wkt: &str) -> (f64, f64) {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        r#"(?i)\b(?:SPHEROID|ELLIPSOID)\s*\[\s*"[^"]*"\s*,\s*([-+0-9.eE]+)\s*,\s*([-+0-9.eE]+)"#,
    )
    .and_then(|re| re.captures(wkt))
    .and_then(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
    .unwrap_or((WGS84_A, WGS84_INV_F))
}

/// Fails unless lon/lat on the CRS's datum equal WGS84 lon/lat to well under a meter
fn require_wgs84_datum(wkt: &str) -> Result<()> {
    let (semi_major, inverse_flattening) = ellipsoid(wkt);
    if (semi_major - WGS84_A).abs() > 0.5 || (inverse_flattening - WGS84_INV_F).abs() > 1e-3 {
        return Err(Error::Projection(format!(
            "ellipsoid ({}, {}) needs a datum shift (build with the proj-transforms feature)",
            semi_major, inverse_flattening
        )));
    }

    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let shift = cached(&RE, r#"(?i)TOWGS84\s*\[([^\]]*)\]"#)
        .and_then(|re| re.captures(wkt))
        .map(|c| {
            c[1].split(',')
                .filter_map(|v| v.trim().parse::<f64>().ok())
                .any(|v| v != 0.0)
        })
        .unwrap_or(false);
    if shift {
        return Err(Error::Projection(
            "TOWGS84 datum shift needs the proj-transforms feature".to_string(),
        ));
    }
    Ok(())
}

/// Meters per unit of the projected CRS: the last linear `UNIT`
fn linear_unit(wkt: &str) -> f64 {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(&RE, r#"(?i)\b(?:UNIT|LENGTHUNIT)\s*\[\s*"([^"]+)"\s*,\s*([-+0-9.eE]+)"#) else {
        return 1.0;
    };
    re.captures_iter(wkt)
        .filter(|c| {
            let name = c[1].to_ascii_lowercase();
            !name.contains("degree") && !name.contains("radian") && !name.contains("grad")
        })
        .filter_map(|c| c[2].parse::<f64>().ok())
        .last()
        .filter(|u| *u > 0.0)
        .unwrap_or(1.0)
}
