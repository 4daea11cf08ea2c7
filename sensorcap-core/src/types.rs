//! Core types for decoded capture data.
//!
//! A capture file is a sequence of [`Frame`]s. Each frame payload is decoded by
//! a sensor schema into a [`Record`]; point-cloud records additionally carry a
//! self-describing field layout that is validated before the raw buffer is
//! reinterpreted.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// One `(timestamp, payload)` unit read from a container stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Acquisition-host capture time in epoch seconds
    pub timestamp: f64,
    /// Schema-encoded message bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a new frame.
    #[inline]
    pub fn new(timestamp: f64, payload: Vec<u8>) -> Self {
        Self { timestamp, payload }
    }
}

/// Point-field datatypes, numbered as in the ROS `PointField` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointFieldType {
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl PointFieldType {
    /// Attempts to parse a datatype from its wire value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Int8),
            2 => Some(Self::Uint8),
            3 => Some(Self::Int16),
            4 => Some(Self::Uint16),
            5 => Some(Self::Int32),
            6 => Some(Self::Uint32),
            7 => Some(Self::Float32),
            8 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Width of one element in bytes.
    #[inline]
    pub fn size_bytes(self) -> u32 {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

/// Describes one named channel inside a point record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Byte offset from the start of the point
    pub offset: u32,
    pub datatype: PointFieldType,
    /// Number of elements of `datatype` in this field
    pub count: u32,
}

impl FieldDescriptor {
    /// Creates a single-element `Float32` field, the only kind the canonical
    /// layout accepts.
    pub fn float32(name: impl Into<String>, offset: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            datatype: PointFieldType::Float32,
            count: 1,
        }
    }
}

/// Instrument-side header of a point-cloud message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointCloudHeader {
    pub seq: u32,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
    pub frame_id: String,
}

impl PointCloudHeader {
    /// Instrument clock in epoch seconds.
    #[inline]
    pub fn stamp(&self) -> f64 {
        self.timestamp_sec as f64 + self.timestamp_nsec as f64 / 1e9
    }
}

/// A dense grid of spatial samples with a self-describing field layout.
///
/// `data` holds `height` rows of `row_step` bytes each; within a row every
/// point occupies `point_step` bytes laid out according to `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub header: PointCloudHeader,
    pub width: u32,
    pub height: u32,
    pub point_step: u32,
    pub row_step: u32,
    pub fields: Vec<FieldDescriptor>,
    pub data: Vec<u8>,
    pub is_bigendian: bool,
    pub is_dense: bool,
}

impl PointCloud {
    /// Number of points the cloud declares (`width * height`), or `None`
    /// when that does not fit in `usize`.
    #[inline]
    pub fn point_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }
}

/// Columns extracted from a canonical-layout [`PointCloud`].
///
/// All columns have length `width * height`. `z` is `None` when the cloud
/// was produced without a z channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPointCloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Option<Vec<f32>>,
    pub intensity: Vec<f32>,
}

impl DecodedPointCloud {
    /// Number of decoded points.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// A camera frame as delivered by the instrument (undemosaiced).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraImage {
    pub width: u32,
    pub height: u32,
    /// Device timestamp in microseconds
    pub timestamp: u64,
    pub pixels: Vec<u8>,
}

/// One inertial measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Device timestamp in seconds
    pub timestamp: f64,
    /// Angular rate (x, y, z)
    pub gyro: [f32; 3],
    /// Linear acceleration (x, y, z)
    pub accel: [f32; 3],
}

/// Instrument calibration dump, kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibration {
    pub text: String,
}

/// A decoded, sensor-specific message.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Camera(CameraImage),
    Imu(ImuSample),
    PointCloud(PointCloud),
    Calibration(Calibration),
    /// Payload passed through without interpretation
    Raw(Vec<u8>),
}

impl Record {
    /// Short variant name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Camera(_) => "camera",
            Self::Imu(_) => "imu",
            Self::PointCloud(_) => "point_cloud",
            Self::Calibration(_) => "calibration",
            Self::Raw(_) => "raw",
        }
    }
}

/// A [`Record`] together with the frame it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRecord {
    /// Zero-based index of the source frame in its container
    pub frame_index: usize,
    /// Acquisition-host timestamp of the source frame
    pub system_timestamp: f64,
    pub record: Record,
}

/// Files captured at the same instant as a primary capture file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanionFileSet {
    pub primary_path: PathBuf,
    /// Original source directory read from the side-car
    pub provenance_directory: PathBuf,
    /// Full paths of every match; may include the primary's own name
    pub matched_paths: BTreeSet<PathBuf>,
}

impl CompanionFileSet {
    /// A set with no matches.
    pub fn empty(primary_path: PathBuf, provenance_directory: PathBuf) -> Self {
        Self {
            primary_path,
            provenance_directory,
            matched_paths: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matched_paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matched_paths.len()
    }
}
