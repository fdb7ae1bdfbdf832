mod common;

use common::{null_shape, point, write_dbf, write_point_layer, write_shp, UTM33N_PRJ, WGS84_PRJ};
use nlgis::ingest::{ProgressMessage, Projection, ShapefileIngestor};
use nlgis::SqliteStore;
use tempfile::TempDir;

fn parks() -> Vec<common::PointFeature> {
    vec![
        point(13.40, 52.52, &["Beton", "Spielplatz", "Nord"]),
        point(13.41, 52.51, &["Holz", "Liegewiese", "Sued"]),
        point(13.42, 52.50, &["Beton", "Spielplatz", "West"]),
    ]
}

#[tokio::test]
async fn test_missing_prj_skips_only_that_layer() {
    let dir = TempDir::new().unwrap();
    write_point_layer(dir.path(), "A_Trees", &["ART"], &[point(13.4, 52.5, &["Linde"])], None);
    write_point_layer(dir.path(), "B_Parks", &["d_MAT", "d_FKT", "NAM"], &parks(), Some(WGS84_PRJ));

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = ShapefileIngestor::default()
        .ingest_dir(&mut store, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.layers.len(), 2);
    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].layer, "A_Trees");
    assert!(failed[0].error.as_deref().unwrap().contains("A_Trees"));

    assert_eq!(summary.layers[1].inserted, 3);
    assert_eq!(store.count_layer("B_Parks").unwrap(), 3);
    assert_eq!(store.layer_names().unwrap(), vec!["B_Parks"]);
}

#[tokio::test]
async fn test_seeding_twice_doubles_counts() {
    let dir = TempDir::new().unwrap();
    write_point_layer(dir.path(), "Parks", &["d_MAT", "d_FKT", "NAM"], &parks(), Some(WGS84_PRJ));

    let mut store = SqliteStore::open_in_memory().unwrap();
    let ingestor = ShapefileIngestor::default();
    ingestor.ingest_dir(&mut store, dir.path()).await.unwrap();
    assert_eq!(store.count_layer("Parks").unwrap(), 3);

    ingestor.ingest_dir(&mut store, dir.path()).await.unwrap();
    assert_eq!(store.count_layer("Parks").unwrap(), 6);

    store.clear_layer("Parks").unwrap();
    assert_eq!(store.count_objects().unwrap(), 0);
}

#[tokio::test]
async fn test_properties_keep_dbf_field_order() {
    let dir = TempDir::new().unwrap();
    write_point_layer(dir.path(), "Parks", &["d_MAT", "d_FKT", "NAM"], &parks(), Some(WGS84_PRJ));

    let mut store = SqliteStore::open_in_memory().unwrap();
    ShapefileIngestor::default()
        .ingest_dir(&mut store, dir.path())
        .await
        .unwrap();

    let properties = store.sample_properties("Parks").unwrap().unwrap();
    let keys: Vec<&str> = properties.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["d_MAT", "d_FKT", "NAM"]);
    assert_eq!(properties["d_FKT"], "Spielplatz");
}

#[tokio::test]
async fn test_utm_layer_reprojects_within_source_extent() {
    let dir = TempDir::new().unwrap();
    let (min_e, max_e, min_n, max_n) = (385_000.0, 395_000.0, 5_815_000.0, 5_825_000.0);
    let features: Vec<_> = (0..5)
        .map(|i| {
            let t = i as f64 / 4.0;
            point(
                min_e + t * (max_e - min_e),
                min_n + (1.0 - t) * (max_n - min_n),
                &["Spree"],
            )
        })
        .collect();
    write_point_layer(dir.path(), "Rivers", &["NAM"], &features, Some(UTM33N_PRJ));

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = ShapefileIngestor::default()
        .ingest_dir(&mut store, dir.path())
        .await
        .unwrap();
    assert_eq!(summary.inserted(), 5);

    let projection = Projection::from_wkt(UTM33N_PRJ).unwrap();
    for geometry in store.layer_geometries("Rivers").unwrap() {
        let value: serde_json::Value = serde_json::from_str(&geometry).unwrap();
        let lon = value["coordinates"][0].as_f64().unwrap();
        let lat = value["coordinates"][1].as_f64().unwrap();
        assert!((13.0..14.0).contains(&lon), "lon = {}", lon);
        assert!((52.0..53.0).contains(&lat), "lat = {}", lat);

        let (e, n) = projection.from_wgs84(lon, lat);
        assert!(e >= min_e - 0.01 && e <= max_e + 0.01, "easting {}", e);
        assert!(n >= min_n - 0.01 && n <= max_n + 0.01, "northing {}", n);
    }
}

#[tokio::test]
async fn test_null_shapes_are_skipped_and_counted() {
    let dir = TempDir::new().unwrap();
    write_point_layer(
        dir.path(),
        "Trees",
        &["ART"],
        &[
            point(13.4, 52.5, &["Linde"]),
            null_shape(&["Eiche"]),
            point(13.5, 52.4, &["Ahorn"]),
        ],
        Some(WGS84_PRJ),
    );

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = ShapefileIngestor::default()
        .ingest_dir(&mut store, dir.path())
        .await
        .unwrap();

    let report = &summary.layers[0];
    assert!(report.is_success());
    assert_eq!(report.features, 3);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.inserted, 2);
    assert_eq!(store.count_layer("Trees").unwrap(), 2);
}

#[tokio::test]
async fn test_shape_record_mismatch_fails_layer() {
    let dir = TempDir::new().unwrap();
    write_shp(&dir.path().join("Broken.shp"), &[Some((13.4, 52.5)), Some((13.5, 52.5))]);
    write_dbf(&dir.path().join("Broken.dbf"), &["ART"], &[vec!["Linde".to_string()]]);
    std::fs::write(dir.path().join("Broken.prj"), WGS84_PRJ).unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = ShapefileIngestor::default()
        .ingest_dir(&mut store, dir.path())
        .await
        .unwrap();

    let error = summary.layers[0].error.as_deref().unwrap();
    assert!(error.contains("2 shapes but 1 attribute records"), "{}", error);
    assert_eq!(store.count_objects().unwrap(), 0);
}

#[tokio::test]
async fn test_progress_reports_each_batch() {
    let dir = TempDir::new().unwrap();
    let features: Vec<_> = (0..5).map(|i| point(13.0 + i as f64 / 10.0, 52.5, &["x"])).collect();
    write_point_layer(dir.path(), "Lamps", &["ART"], &features, Some(WGS84_PRJ));

    let (tx, rx) = crossbeam::channel::unbounded();
    let mut store = SqliteStore::open_in_memory().unwrap();
    let ingestor = ShapefileIngestor::new(2).with_progress(tx);
    ingestor.ingest_dir(&mut store, dir.path()).await.unwrap();
    drop(ingestor);

    let messages: Vec<ProgressMessage> = rx.iter().collect();
    let inserted: Vec<usize> = messages
        .iter()
        .filter_map(|m| match m {
            ProgressMessage::Inserted { inserted, .. } => Some(*inserted),
            _ => None,
        })
        .collect();

    assert_eq!(
        messages.first(),
        Some(&ProgressMessage::LayerStarted {
            layer: "Lamps".to_string(),
            total: 5
        })
    );
    assert_eq!(inserted, vec![2, 4, 5]);
    assert_eq!(
        messages.last(),
        Some(&ProgressMessage::LayerFinished {
            layer: "Lamps".to_string(),
            inserted: 5
        })
    );
}

#[tokio::test]
async fn test_upper_case_extensions_are_found() {
    let dir = TempDir::new().unwrap();
    write_shp(&dir.path().join("Upper.SHP"), &[Some((13.4, 52.5))]);
    write_dbf(&dir.path().join("Upper.DBF"), &["NAM"], &[vec!["Mitte".to_string()]]);
    std::fs::write(dir.path().join("Upper.PRJ"), WGS84_PRJ).unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = ShapefileIngestor::default()
        .ingest_dir(&mut store, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.layers.len(), 1);
    assert!(summary.layers[0].is_success(), "{:?}", summary.layers[0].error);
    assert_eq!(store.count_layer("Upper").unwrap(), 1);
}

#[tokio::test]
async fn test_failed_batch_keeps_earlier_batches_and_other_layers() {
    let dir = TempDir::new().unwrap();
    let lamps: Vec<_> = (0..5).map(|i| point(13.0 + i as f64 / 10.0, 52.5, &["x"])).collect();
    write_point_layer(dir.path(), "Lamps", &["ART"], &lamps, Some(WGS84_PRJ));
    write_point_layer(
        dir.path(),
        "Trees",
        &["ART"],
        &[point(13.4, 52.5, &["Linde"]), point(13.5, 52.4, &["Eiche"])],
        Some(WGS84_PRJ),
    );

    let mut store = SqliteStore::open_in_memory().unwrap();
    // Third Lamps row onwards is refused, so the second batch of two fails
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER lamps_full BEFORE INSERT ON city_objects
             WHEN NEW.layer_name = 'Lamps'
              AND (SELECT COUNT(*) FROM city_objects WHERE layer_name = 'Lamps') >= 2
             BEGIN SELECT RAISE(ABORT, 'lamps table full'); END;",
        )
        .unwrap();

    let (tx, rx) = crossbeam::channel::unbounded();
    let ingestor = ShapefileIngestor::new(2).with_progress(tx);
    let summary = ingestor.ingest_dir(&mut store, dir.path()).await.unwrap();
    drop(ingestor);

    let lamps = &summary.layers[0];
    assert_eq!(lamps.layer, "Lamps");
    assert_eq!(lamps.inserted, 2);
    assert!(lamps.error.as_deref().unwrap().contains("lamps table full"), "{:?}", lamps.error);
    assert_eq!(store.count_layer("Lamps").unwrap(), 2);

    let trees = &summary.layers[1];
    assert!(trees.is_success(), "{:?}", trees.error);
    assert_eq!(trees.inserted, 2);
    assert_eq!(store.count_layer("Trees").unwrap(), 2);

    let messages: Vec<ProgressMessage> = rx.iter().collect();
    assert!(messages.iter().any(|m| matches!(m, ProgressMessage::LayerFailed { layer, .. } if layer == "Lamps")));
    assert!(!messages.iter().any(|m| matches!(
        m,
        ProgressMessage::Inserted { layer, inserted, .. } if layer == "Lamps" && *inserted > 2
    )));
}
