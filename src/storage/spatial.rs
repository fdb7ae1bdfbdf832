//! Spatial SQL surface registered on every store connection.
//!
//! Geometry values are stored as normalized GeoJSON text in SRID 4326. The functions
//! mirror the PostGIS names the query generator is instructed to use:
//!
//! | Function | Returns |
//! |----------|---------|
//! | `ST_GeomFromGeoJSON(text)` | validated, normalized geometry |
//! | `ST_SetSRID(geom, srid)` | `geom` (only 4326 is accepted) |
//! | `ST_AsGeoJSON(geom)` | GeoJSON text |
//! | `ST_GeometryType(geom)` | `ST_Point`, `ST_Polygon`, ... |
//! | `ST_X(geom)` / `ST_Y(geom)` | point coordinate |
//! | `ST_Centroid(geom)` | point geometry |
//! | `ST_Area(geom)` | planar area in degrees² |
//! | `ST_Distance(a, b)` | planar distance in degrees |
//! | `ST_Contains` / `ST_Within` / `ST_Intersects` | 1 / 0 |
//! | `ST_DWithin(a, b, d)` | 1 / 0 |
//! | `ST_MakePoint(x, y)` | point geometry |
//! | `ST_MakeEnvelope(xmin, ymin, xmax, ymax [, srid])` | polygon geometry |
//!
//! NULL in, NULL out, as in PostGIS.

use geo::{Area, Centroid, Contains, Intersects, Within};
use geo::{Coord, Geometry, Point, Rect};
use geojson::{GeoJson, Value};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::{Connection, ToSql};
use std::panic::UnwindSafe;

use crate::SRID;

/// Register every `ST_*` function on a connection.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    register(conn, "ST_GeomFromGeoJSON", 1, st_geom_from_geojson)?;
    register(conn, "ST_SetSRID", 2, st_set_srid)?;
    register(conn, "ST_AsGeoJSON", 1, st_as_geojson)?;
    register(conn, "ST_GeometryType", 1, st_geometry_type)?;
    register(conn, "ST_X", 1, st_x)?;
    register(conn, "ST_Y", 1, st_y)?;
    register(conn, "ST_Centroid", 1, st_centroid)?;
    register(conn, "ST_Area", 1, st_area)?;
    register(conn, "ST_Distance", 2, st_distance)?;
    register(conn, "ST_Contains", 2, st_contains)?;
    register(conn, "ST_Within", 2, st_within)?;
    register(conn, "ST_Intersects", 2, st_intersects)?;
    register(conn, "ST_DWithin", 3, st_dwithin)?;
    register(conn, "ST_MakePoint", 2, st_make_point)?;
    register(conn, "ST_MakeEnvelope", -1, st_make_envelope)?;
    Ok(())
}

fn register<T, F>(conn: &Connection, name: &str, n_arg: i32, func: F) -> rusqlite::Result<()>
where
    T: ToSql,
    F: FnMut(&Context<'_>) -> rusqlite::Result<T> + Send + UnwindSafe + 'static,
{
    conn.create_scalar_function(
        name,
        n_arg,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        func,
    )
}

// ========== GeoJSON <-> geo ==========

/// Parse GeoJSON text (a bare geometry or a feature carrying one) into a geometry.
///
/// Rejects positions with fewer than two or non-finite ordinates, which the
/// `geojson` → `geo` conversion would otherwise not survive.
pub fn parse_geometry(text: &str) -> Result<Geometry<f64>, String> {
    let geojson: GeoJson = text.parse().map_err(|e| format!("invalid GeoJSON: {}", e))?;
    let geometry = match geojson {
        GeoJson::Geometry(g) => g,
        GeoJson::Feature(f) => f.geometry.ok_or("feature has no geometry")?,
        GeoJson::FeatureCollection(_) => {
            return Err("expected a geometry, got a FeatureCollection".to_string());
        }
    };

    if !positions_well_formed(&geometry.value) {
        return Err("geometry has malformed positions".to_string());
    }

    Geometry::<f64>::try_from(geometry).map_err(|e| format!("unsupported geometry: {}", e))
}

/// Serialize a geometry as normalized GeoJSON text.
pub fn geometry_to_geojson(geometry: &Geometry<f64>) -> serde_json::Result<String> {
    serde_json::to_string(&geojson::Geometry::new(Value::from(geometry)))
}

fn positions_well_formed(value: &Value) -> bool {
    let position_ok = |p: &Vec<f64>| p.len() >= 2 && p.iter().all(|c| c.is_finite());
    match value {
        Value::Point(p) => position_ok(p),
        Value::MultiPoint(ps) | Value::LineString(ps) => ps.iter().all(position_ok),
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            lines.iter().flatten().all(position_ok)
        }
        Value::MultiPolygon(polys) => polys.iter().flatten().flatten().all(position_ok),
        Value::GeometryCollection(geoms) => geoms.iter().all(|g| positions_well_formed(&g.value)),
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "ST_Point",
        Geometry::Line(_) | Geometry::LineString(_) => "ST_LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "ST_Polygon",
        Geometry::MultiPoint(_) => "ST_MultiPoint",
        Geometry::MultiLineString(_) => "ST_MultiLineString",
        Geometry::MultiPolygon(_) => "ST_MultiPolygon",
        Geometry::GeometryCollection(_) => "ST_GeometryCollection",
    }
}

// ========== Argument helpers ==========

fn user_error(message: impl Into<String>) -> rusqlite::Error {
    let message: String = message.into();
    rusqlite::Error::UserFunctionError(message.into())
}

fn geometry_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<Geometry<f64>>> {
    match ctx.get::<Option<String>>(idx)? {
        Some(text) => parse_geometry(&text).map(Some).map_err(user_error),
        None => Ok(None),
    }
}

fn geometry_pair(ctx: &Context<'_>) -> rusqlite::Result<Option<(Geometry<f64>, Geometry<f64>)>> {
    Ok(geometry_arg(ctx, 0)?.zip(geometry_arg(ctx, 1)?))
}

fn encode(geometry: &Geometry<f64>) -> rusqlite::Result<String> {
    geometry_to_geojson(geometry).map_err(|e| user_error(e.to_string()))
}

// ========== Functions ==========

fn st_geom_from_geojson(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    geometry_arg(ctx, 0)?.map(|g| encode(&g)).transpose()
}

fn st_set_srid(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    let srid: i32 = ctx.get(1)?;
    if srid != SRID {
        return Err(user_error(format!(
            "store only holds SRID {}, got {}",
            SRID, srid
        )));
    }
    Ok(ctx.get::<Option<String>>(0)?)
}

fn st_as_geojson(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    geometry_arg(ctx, 0)?.map(|g| encode(&g)).transpose()
}

fn st_geometry_type(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| geometry_type_name(&g).to_string()))
}

fn point_arg(ctx: &Context<'_>) -> rusqlite::Result<Option<Point<f64>>> {
    match geometry_arg(ctx, 0)? {
        Some(Geometry::Point(p)) => Ok(Some(p)),
        Some(other) => Err(user_error(format!(
            "argument must be a point, got {}",
            geometry_type_name(&other)
        ))),
        None => Ok(None),
    }
}

fn st_x(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(point_arg(ctx)?.map(|p| p.x()))
}

fn st_y(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(point_arg(ctx)?.map(|p| p.y()))
}

fn st_centroid(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    match geometry_arg(ctx, 0)? {
        Some(g) => g
            .centroid()
            .map(|c| encode(&Geometry::Point(c)))
            .transpose(),
        None => Ok(None),
    }
}

fn st_area(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(geometry_arg(ctx, 0)?.map(|g| g.unsigned_area()))
}

#[allow(deprecated)]
fn planar_distance(a: &Geometry<f64>, b: &Geometry<f64>) -> f64 {
    use geo::EuclideanDistance;
    a.euclidean_distance(b)
}

fn st_distance(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(geometry_pair(ctx)?.map(|(a, b)| planar_distance(&a, &b)))
}

fn st_contains(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    Ok(geometry_pair(ctx)?.map(|(a, b)| a.contains(&b)))
}

fn st_within(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    Ok(geometry_pair(ctx)?.map(|(a, b)| a.is_within(&b)))
}

fn st_intersects(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    Ok(geometry_pair(ctx)?.map(|(a, b)| a.intersects(&b)))
}

fn st_dwithin(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    let limit: Option<f64> = ctx.get(2)?;
    Ok(geometry_pair(ctx)?
        .zip(limit)
        .map(|((a, b), d)| planar_distance(&a, &b) <= d))
}

fn st_make_point(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    let x: Option<f64> = ctx.get(0)?;
    let y: Option<f64> = ctx.get(1)?;
    x.zip(y)
        .map(|(x, y)| encode(&Geometry::Point(Point::new(x, y))))
        .transpose()
}

fn st_make_envelope(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    if ctx.len() != 4 && ctx.len() != 5 {
        return Err(user_error("ST_MakeEnvelope expects 4 or 5 arguments"));
    }
    if ctx.len() == 5 {
        let srid: i32 = ctx.get(4)?;
        if srid != SRID {
            return Err(user_error(format!("store only holds SRID {}, got {}", SRID, srid)));
        }
    }

    let mut bounds = [0.0f64; 4];
    for (idx, slot) in bounds.iter_mut().enumerate() {
        match ctx.get::<Option<f64>>(idx)? {
            Some(v) => *slot = v,
            None => return Ok(None),
        }
    }
    let [xmin, ymin, xmax, ymax] = bounds;
    let rect = Rect::new(Coord { x: xmin, y: ymin }, Coord { x: xmax, y: ymax });
    encode(&Geometry::Polygon(rect.to_polygon())).map(Some)
}
