/// Events the ingestor emits while seeding, consumed by the progress UI thread
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressMessage {
    LayerStarted {
        layer: String,
        total: usize,
    },
    Inserted {
        layer: String,
        inserted: usize,
        total: usize,
    },
    LayerFinished {
        layer: String,
        inserted: usize,
    },
    LayerFailed {
        layer: String,
        error: String,
    },
}
