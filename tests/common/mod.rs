//! Shapefile triad fixtures written byte by byte (point layers, character fields)

#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

pub const UTM33N_PRJ: &str = r#"PROJCS["ETRS_1989_UTM_Zone_33N",GEOGCS["GCS_ETRS_1989",DATUM["D_ETRS_1989",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",15.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

const FIELD_LEN: usize = 32;

/// One feature: a point (or a null shape) plus one value per field
pub struct PointFeature {
    pub position: Option<(f64, f64)>,
    pub values: Vec<String>,
}

pub fn point(x: f64, y: f64, values: &[&str]) -> PointFeature {
    PointFeature {
        position: Some((x, y)),
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

pub fn null_shape(values: &[&str]) -> PointFeature {
    PointFeature {
        position: None,
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

/// Write `<name>.shp`, `<name>.dbf` and, if given, `<name>.prj` into `dir`
pub fn write_point_layer(
    dir: &Path,
    name: &str,
    fields: &[&str],
    features: &[PointFeature],
    prj: Option<&str>,
) {
    let positions: Vec<_> = features.iter().map(|f| f.position).collect();
    let rows: Vec<Vec<String>> = features.iter().map(|f| f.values.clone()).collect();

    write_shp(&dir.join(format!("{}.shp", name)), &positions);
    write_dbf(&dir.join(format!("{}.dbf", name)), fields, &rows);
    if let Some(prj) = prj {
        fs::write(dir.join(format!("{}.prj", name)), prj).unwrap();
    }
}

/// Point shapefile; `None` entries become null shape records
pub fn write_shp(path: &Path, positions: &[Option<(f64, f64)>]) {
    let points: Vec<(f64, f64)> = positions.iter().flatten().copied().collect();
    let bbox = if points.is_empty() {
        [0.0; 4]
    } else {
        [
            points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
            points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
            points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
            points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
        ]
    };

    let mut records = Vec::new();
    for (i, position) in positions.iter().enumerate() {
        let mut content = Vec::new();
        match position {
            Some((x, y)) => {
                content.extend_from_slice(&1i32.to_le_bytes());
                content.extend_from_slice(&x.to_le_bytes());
                content.extend_from_slice(&y.to_le_bytes());
            }
            None => content.extend_from_slice(&0i32.to_le_bytes()),
        }
        records.extend_from_slice(&(i as i32 + 1).to_be_bytes());
        records.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());
        records.extend_from_slice(&content);
    }

    let mut bytes = Vec::with_capacity(100 + records.len());
    bytes.extend_from_slice(&9994i32.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 20]);
    bytes.extend_from_slice(&(((100 + records.len()) / 2) as i32).to_be_bytes());
    bytes.extend_from_slice(&1000i32.to_le_bytes());
    bytes.extend_from_slice(&1i32.to_le_bytes());
    for v in bbox {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    for _ in 0..4 {
        bytes.extend_from_slice(&0f64.to_le_bytes());
    }
    bytes.extend_from_slice(&records);

    fs::write(path, bytes).unwrap();
}

/// dBase III table with character fields only
pub fn write_dbf(path: &Path, fields: &[&str], rows: &[Vec<String>]) {
    let header_len = 32 + 32 * fields.len() + 1;
    let record_len = 1 + FIELD_LEN * fields.len();

    let mut bytes = Vec::new();
    bytes.push(0x03);
    bytes.extend_from_slice(&[124, 1, 1]);
    bytes.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(header_len as u16).to_le_bytes());
    bytes.extend_from_slice(&(record_len as u16).to_le_bytes());
    bytes.extend_from_slice(&[0u8; 20]);

    for name in fields {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = b'C';
        descriptor[16] = FIELD_LEN as u8;
        bytes.extend_from_slice(&descriptor);
    }
    bytes.push(0x0D);

    for row in rows {
        bytes.push(b' ');
        for i in 0..fields.len() {
            let value = row.get(i).map(String::as_str).unwrap_or("");
            let mut cell = vec![b' '; FIELD_LEN];
            cell[..value.len()].copy_from_slice(value.as_bytes());
            bytes.extend_from_slice(&cell);
        }
    }
    bytes.push(0x1A);

    fs::write(path, bytes).unwrap();
}
