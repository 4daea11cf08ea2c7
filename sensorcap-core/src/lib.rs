//! Extraction library for multi-sensor capture files.
//!
//! Capture files are length-prefixed frame containers written by an
//! acquisition host. This crate reads the frames, decodes them with a
//! per-sensor schema, turns LIDAR point clouds into flat point tables and
//! recovers the companion files recorded alongside a capture.
//!
//! # Example
//!
//! ```no_run
//! use sensorcap_core::decoder::{MessageDecoder, RawSchema};
//! use sensorcap_core::diagnostics::Diagnostics;
//! use sensorcap_core::frame::FrameReader;
//!
//! let diagnostics = Diagnostics::new();
//! let decoder = MessageDecoder::new(&RawSchema, diagnostics.clone());
//! let extraction = decoder.decode_stream(FrameReader::open("capture.bin").unwrap());
//!
//! println!("Decoded {} of {} frames", extraction.records.len(), extraction.frame_count);
//! println!("{} warnings", diagnostics.warning_count());
//! ```
//!
//! # Features
//!
//! - Streaming frame reader with precise truncation reporting
//! - Pluggable message schemas with skip-or-abort salvage
//! - Validated point-cloud field decoding with a z-omitted variant
//! - Single-allocation point accumulation across a whole file
//! - Companion file recovery through `.origin` side-cars

pub mod accumulator;
pub mod correlate;
pub mod decoder;
pub mod diagnostics;
pub mod dispatch;
pub mod frame;
pub mod output;
pub mod pointcloud;
pub mod types;

// Re-export commonly used types
pub use correlate::{CompanionClassifier, CompanionFileCorrelator, CorrelateError};
pub use decoder::{DecodeError, Extraction, MessageDecoder, SalvagePolicy, Schema};
pub use diagnostics::Diagnostics;
pub use dispatch::{ExportDispatcher, ExportError, ExportSink, SensorProfile};
pub use frame::{FrameReader, FrameWriter, FramingError};
pub use output::{FsExportSink, OutputError};
pub use pointcloud::{LayoutError, PointCloudFieldDecoder};
pub use types::{CompanionFileSet, DecodedPointCloud, Frame, PointCloud, Record, TimedRecord};
