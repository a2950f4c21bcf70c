pub mod segment;

pub use segment::{EventSink, LogSink, SegmentDestination, SegmentSettings};
