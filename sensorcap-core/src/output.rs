//! Output naming and the filesystem export sink.
//!
//! Every artifact derived from an input file `<base>.<ext>` is named
//!
//! ```text
//! {base}_preproc[-{index:020}][_{detail}].{extension}
//! ```
//!
//! The index appears only for per-record artifacts; the detail tag tells
//! apart several encodings of the same data.

use crate::accumulator::{PointAccumulator, PointRow, COLUMNS};
use crate::correlate::Companion;
use crate::dispatch::ExportSink;
use crate::frame::{FrameReader, FramingError};
use crate::types::{ImuSample, Record, TimedRecord};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Builds output file names for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    base: String,
}

impl OutputNames {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Validates `path` as an input with extension `input_ext` and takes its
    /// file name without that extension as the base.
    ///
    /// `input_ext` may be given with or without the leading dot.
    pub fn for_input(path: &Path, input_ext: &str) -> Result<Self, OutputError> {
        if !path.exists() {
            return Err(OutputError::InvalidInput(format!(
                "file doesn't exist: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(OutputError::InvalidInput(format!(
                "not a file: {}",
                path.display()
            )));
        }
        let ext = input_ext.strip_prefix('.').unwrap_or(input_ext);
        let suffix = format!(".{}", ext);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OutputError::InvalidInput(format!("bad file name: {}", path.display())))?;
        match name.strip_suffix(&suffix) {
            Some(base) if !base.is_empty() => Ok(Self::new(base)),
            _ => Err(OutputError::InvalidInput(format!(
                "expects input file with ext: {}. Input: {}",
                ext, name
            ))),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Formats one output file name.
    pub fn name(&self, index: Option<u64>, extension: &str, detail: Option<&str>) -> String {
        let mut name = format!("{}_preproc", self.base);
        if let Some(index) = index {
            name.push_str(&format!("-{:020}", index));
        }
        if let Some(detail) = detail {
            name.push('_');
            name.push_str(detail);
        }
        name.push('.');
        name.push_str(extension);
        name
    }
}

/// CSV writer for accumulated LIDAR points.
pub struct PointCsvWriter<W: Write> {
    writer: BufWriter<W>,
    z_precision: usize,
}

impl<W: Write> PointCsvWriter<W> {
    /// Creates a writer; `flat_z` drops z to one decimal, for clouds without
    /// a z channel.
    pub fn new(writer: W, flat_z: bool) -> Self {
        Self {
            writer: BufWriter::new(writer),
            z_precision: if flat_z { 1 } else { 7 },
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", COLUMNS.join(","))?;
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[PointRow]) -> Result<(), OutputError> {
        for row in rows {
            writeln!(
                self.writer,
                "{:.9},{:.9},{:.7},{:.7},{:.*},{}",
                row[0], row[1], row[2], row[3], self.z_precision, row[4], row[5] as i64
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for IMU samples.
pub struct ImuCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> ImuCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "system_timestamp,timestamp,gyro_x,gyro_y,gyro_z,accel_x,accel_y,accel_z"
        )?;
        Ok(())
    }

    pub fn write_samples(&mut self, samples: &[(f64, ImuSample)]) -> Result<(), OutputError> {
        for (system_timestamp, s) in samples {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{}",
                system_timestamp,
                s.timestamp,
                s.gyro[0],
                s.gyro[1],
                s.gyro[2],
                s.accel[0],
                s.accel[1],
                s.accel[2]
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes accumulated points to a CSV file.
pub fn write_point_csv<P: AsRef<Path>>(
    path: P,
    points: &PointAccumulator,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = PointCsvWriter::new(file, points.z_is_zero());
    writer.write_header()?;
    writer.write_rows(points.rows())?;
    writer.flush()?;
    Ok(())
}

/// Writes `index,timestamp,length` for every frame of a container.
///
/// Returns the number of frames listed. A truncated container is reported
/// after the complete frames have been written.
pub fn write_frame_index<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
) -> Result<usize, OutputError> {
    let mut reader = FrameReader::open(input)?;
    let mut writer = BufWriter::new(File::create(output)?);
    writeln!(writer, "index,timestamp,length")?;

    let mut count = 0;
    let result = loop {
        match reader.next_frame() {
            Ok(Some(frame)) => {
                writeln!(
                    writer,
                    "{},{:.9},{}",
                    count,
                    frame.timestamp,
                    frame.payload.len()
                )?;
                count += 1;
            }
            Ok(None) => break Ok(count),
            Err(e) => break Err(e.into()),
        }
    };
    writer.flush()?;
    result
}

/// Export sink writing plain files into one output directory.
#[derive(Debug)]
pub struct FsExportSink {
    out_dir: PathBuf,
    imu_samples: Vec<(f64, ImuSample)>,
    written: Vec<PathBuf>,
}

impl FsExportSink {
    /// Creates the sink, creating `out_dir` if needed.
    pub fn new<P: AsRef<Path>>(out_dir: P) -> Result<Self, OutputError> {
        let out_dir = out_dir.as_ref().to_path_buf();
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            imu_samples: Vec::new(),
            written: Vec::new(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Every file created or appended to so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn target(&mut self, name: String) -> PathBuf {
        let path = self.out_dir.join(name);
        if !self.written.contains(&path) {
            self.written.push(path.clone());
        }
        path
    }
}

impl ExportSink for FsExportSink {
    fn begin(&mut self, _names: &OutputNames) {
        self.imu_samples.clear();
    }

    fn record(&mut self, names: &OutputNames, record: &TimedRecord) -> Result<(), OutputError> {
        match &record.record {
            Record::Raw(bytes) => {
                let path = self.target(names.name(Some(record.frame_index as u64), "bin", None));
                fs::write(path, bytes)?;
            }
            Record::Camera(image) => {
                let path = self.target(names.name(Some(image.timestamp), "bin", Some("pixels")));
                fs::write(path, &image.pixels)?;
            }
            Record::Calibration(calibration) => {
                let path = self.target(names.name(None, "txt", Some("calibration")));
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(file, "{}", calibration.text)?;
            }
            Record::Imu(sample) => {
                self.imu_samples.push((record.system_timestamp, *sample));
            }
            Record::PointCloud(_) => {
                return Err(OutputError::InvalidInput(
                    "point clouds are exported through the accumulator".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn point_cloud(
        &mut self,
        names: &OutputNames,
        points: &PointAccumulator,
    ) -> Result<(), OutputError> {
        let path = self.target(names.name(None, "csv", Some("pointcloud")));
        write_point_csv(&path, points)?;
        debug!(path = %path.display(), rows = points.len(), "point cloud written");
        Ok(())
    }

    fn companions(
        &mut self,
        _names: &OutputNames,
        companions: &[Companion],
    ) -> Result<(), OutputError> {
        for companion in companions {
            let Some(file_name) = companion.path.file_name() else {
                continue;
            };
            let dest = self.out_dir.join(file_name);
            // Copying a file onto itself would truncate it.
            if dest.exists() && fs::canonicalize(&dest)? == fs::canonicalize(&companion.path)? {
                continue;
            }
            fs::copy(&companion.path, &dest)?;
            if !self.written.contains(&dest) {
                self.written.push(dest);
            }
        }
        Ok(())
    }

    fn finish(&mut self, names: &OutputNames) -> Result<(), OutputError> {
        if self.imu_samples.is_empty() {
            return Ok(());
        }
        let path = self.target(names.name(None, "csv", Some("imu")));
        let mut writer = ImuCsvWriter::new(File::create(path)?);
        writer.write_header()?;
        writer.write_samples(&self.imu_samples)?;
        writer.flush()?;
        self.imu_samples.clear();
        Ok(())
    }

    fn abort(&mut self, _names: &OutputNames) {
        self.imu_samples.clear();
    }
}
