//! Core data types recorded by the commit log.

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Unique identifier for a time series.
pub type SeriesId = u64;

/// Descriptor of the series a datapoint belongs to.
///
/// The commit log treats the descriptor as opaque payload: it is serialized
/// into the block file alongside each datapoint so a reader can reassociate
/// records with their series, but the log itself never interprets it.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Unique identifier for the series.
    pub id: SeriesId,
    /// Metric name.
    pub metric: String,
    /// Label key/value pairs, sorted by key.
    pub labels: Vec<(String, String)>,
}

impl Series {
    /// Creates a new series descriptor.
    pub fn new(id: SeriesId, metric: impl Into<String>, labels: Vec<(String, String)>) -> Self {
        Self {
            id,
            metric: metric.into(),
            labels,
        }
    }
}

/// A single timestamped value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Timestamp in nanoseconds since the Unix epoch.
    pub timestamp: Timestamp,
    /// Sampled value.
    pub value: f64,
}

impl Datapoint {
    /// Creates a new datapoint.
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Resolution of a datapoint's timestamp as recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimeUnit {
    /// Seconds.
    Seconds = 1,
    /// Milliseconds.
    Milliseconds = 2,
    /// Microseconds.
    Microseconds = 3,
    /// Nanoseconds.
    #[default]
    Nanoseconds = 4,
}
