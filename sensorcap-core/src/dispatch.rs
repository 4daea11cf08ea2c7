//! Per-file export orchestration.
//!
//! A [`SensorProfile`] fixes, once per sensor type, how its files are
//! handled: either decoded frame by frame through a [`Schema`], or treated as
//! an opaque primary whose companion files are collected. The
//! [`ExportDispatcher`] runs that pipeline for one file at a time and hands
//! the results to an [`ExportSink`].

use crate::accumulator::{fill_rows, PointAccumulator, RowPlan};
use crate::correlate::{
    classify_companions, Companion, CompanionClassifier, CompanionFileCorrelator, CorrelateError,
};
use crate::decoder::{MessageDecoder, SalvagePolicy, Schema, SkippedFrame};
use crate::diagnostics::Diagnostics;
use crate::frame::{FrameReader, FramingError};
use crate::output::{OutputError, OutputNames};
use crate::pointcloud::{LayoutError, PointCloudFieldDecoder};
use crate::types::{PointCloud, Record, TimedRecord};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

const SOURCE: &str = "dispatcher";

/// Errors that abort the export of one file.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Correlate(#[from] CorrelateError),

    #[error("cannot read container: {0}")]
    Framing(FramingError),
}

impl From<FramingError> for ExportError {
    fn from(e: FramingError) -> Self {
        match e {
            FramingError::Io(e) => Self::Io(e),
            other => Self::Framing(other),
        }
    }
}

impl From<OutputError> for ExportError {
    fn from(e: OutputError) -> Self {
        match e {
            OutputError::Io(e) => Self::Io(e),
            OutputError::InvalidInput(msg) => Self::InvalidInput(msg),
            OutputError::Framing(e) => e.into(),
        }
    }
}

/// Receives everything extracted from one file.
///
/// Implementations encode records into their final formats. One sink may
/// serve many files; state kept for a file must be reset in [`begin`] and
/// dropped in [`abort`].
///
/// [`begin`]: ExportSink::begin
/// [`abort`]: ExportSink::abort
pub trait ExportSink {
    /// Called before anything else for a file.
    fn begin(&mut self, _names: &OutputNames) {}

    /// Called for every decoded record that is not a point cloud, in frame
    /// order.
    fn record(&mut self, names: &OutputNames, record: &TimedRecord) -> Result<(), OutputError>;

    /// Called once with all points of the file, if it held point clouds.
    fn point_cloud(
        &mut self,
        names: &OutputNames,
        points: &PointAccumulator,
    ) -> Result<(), OutputError>;

    /// Called once with the classified companions of a correlated file.
    fn companions(
        &mut self,
        names: &OutputNames,
        companions: &[Companion],
    ) -> Result<(), OutputError>;

    /// Called after everything else for the file.
    fn finish(&mut self, _names: &OutputNames) -> Result<(), OutputError> {
        Ok(())
    }

    /// Called instead of [`finish`](ExportSink::finish) when the file's
    /// export failed.
    fn abort(&mut self, _names: &OutputNames) {}
}

/// How files of one sensor type are processed.
pub enum Pipeline {
    Decode(Box<dyn Schema>),
    Correlate(Box<dyn CompanionClassifier>),
}

/// Static description of one sensor type.
pub struct SensorProfile {
    pub name: String,
    /// Extension input files must carry, without the dot
    pub input_extension: String,
    pub pipeline: Pipeline,
}

impl SensorProfile {
    /// Profile for sensors whose files are decoded with `schema`.
    pub fn decode<S: Schema + 'static>(
        name: impl Into<String>,
        input_extension: impl Into<String>,
        schema: S,
    ) -> Self {
        Self {
            name: name.into(),
            input_extension: input_extension.into(),
            pipeline: Pipeline::Decode(Box::new(schema)),
        }
    }

    /// Profile for sensors whose files are exported with their companions.
    pub fn correlate<C: CompanionClassifier + 'static>(
        name: impl Into<String>,
        input_extension: impl Into<String>,
        classifier: C,
    ) -> Self {
        Self {
            name: name.into(),
            input_extension: input_extension.into(),
            pipeline: Pipeline::Correlate(Box::new(classifier)),
        }
    }
}

/// Knobs for an export run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub salvage: SalvagePolicy,
}

/// What happened to one file.
#[derive(Debug, Default)]
pub struct ExportSummary {
    pub base_name: String,
    pub frame_count: usize,
    /// Records decoded, point clouds included
    pub records: usize,
    pub skipped: Vec<SkippedFrame>,
    /// Rows written to the point accumulator
    pub points: usize,
    pub framing_error: Option<FramingError>,
    /// Frame index and error of the first non-canonical point cloud
    pub layout_error: Option<(usize, LayoutError)>,
    pub aborted: bool,
    pub companions: Vec<Companion>,
}

impl ExportSummary {
    /// True when nothing was skipped, truncated or rejected.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
            && self.framing_error.is_none()
            && self.layout_error.is_none()
            && !self.aborted
    }
}

/// Decodes every point-cloud record of a file into one accumulator.
///
/// Clouds are validated in frame order before anything is allocated. The
/// first non-canonical cloud ends the pass: only the clouds before it are
/// planned, and the buffer is sized exactly for them.
pub fn accumulate_point_clouds(
    records: &[TimedRecord],
    decoder: &PointCloudFieldDecoder,
    diagnostics: &Diagnostics,
) -> (PointAccumulator, Option<(usize, LayoutError)>) {
    let mut plan = RowPlan::new();
    let mut clouds: Vec<(&TimedRecord, &PointCloud)> = Vec::new();
    let mut failure = None;

    let point_clouds = records.iter().filter_map(|r| match &r.record {
        Record::PointCloud(cloud) => Some((r, cloud)),
        _ => None,
    });
    for (record, cloud) in point_clouds {
        let planned = decoder.validate(cloud).and_then(|_| {
            cloud
                .point_count()
                .and_then(|count| plan.push(count))
                .ok_or(LayoutError::PointCount {
                    width: cloud.width,
                    height: cloud.height,
                })
        });
        if let Err(e) = planned {
            diagnostics.warn(
                SOURCE,
                format!(
                    "frame {}: {}; skipping remaining point clouds",
                    record.frame_index, e
                ),
            );
            failure = Some((record.frame_index, e));
            break;
        }
        clouds.push((record, cloud));
    }

    debug!(
        clouds = clouds.len(),
        rows = plan.total(),
        "allocating point accumulator"
    );
    let mut accumulator = PointAccumulator::with_plan(&plan);

    let mut filled = 0;
    {
        let slices = accumulator.slices_mut(&plan);
        for (((record, cloud), slice), range) in clouds.iter().zip(slices).zip(plan.ranges()) {
            // Already validated above; the layout cannot fail here.
            let Ok(matrix) = decoder.decode_points(cloud) else {
                break;
            };
            fill_rows(slice, record.system_timestamp, cloud.header.stamp(), &matrix);
            filled = range.end;
        }
    }
    accumulator.truncate(filled);

    (accumulator, failure)
}

/// Runs sensor pipelines file by file.
pub struct ExportDispatcher {
    options: ExportOptions,
    diagnostics: Diagnostics,
    point_decoder: PointCloudFieldDecoder,
}

impl ExportDispatcher {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            options: ExportOptions::default(),
            diagnostics,
            point_decoder: PointCloudFieldDecoder::new(),
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Extracts one file with `profile` and hands the results to `sink`.
    ///
    /// A failure is also recorded as a diagnostic.
    pub fn export(
        &self,
        path: &Path,
        profile: &SensorProfile,
        sink: &mut dyn ExportSink,
    ) -> Result<ExportSummary, ExportError> {
        let result = self.run(path, profile, sink);
        if let Err(e) = &result {
            self.diagnostics
                .warn(SOURCE, format!("export of {} failed: {}", path.display(), e));
        }
        result
    }

    fn run(
        &self,
        path: &Path,
        profile: &SensorProfile,
        sink: &mut dyn ExportSink,
    ) -> Result<ExportSummary, ExportError> {
        let names = OutputNames::for_input(path, &profile.input_extension)?;
        let start = Instant::now();

        sink.begin(&names);
        let result = match &profile.pipeline {
            Pipeline::Decode(schema) => self.export_decoded(path, schema.as_ref(), &names, sink),
            Pipeline::Correlate(classifier) => {
                self.export_companions(path, classifier.as_ref(), &names, sink)
            }
        }
        .and_then(|summary| {
            sink.finish(&names)
                .map(|_| summary)
                .map_err(ExportError::from)
        });
        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                sink.abort(&names);
                return Err(e);
            }
        };

        info!(
            path = %path.display(),
            sensor = %profile.name,
            frames = summary.frame_count,
            records = summary.records,
            skipped = summary.skipped.len(),
            points = summary.points,
            companions = summary.companions.len(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "export finished"
        );
        Ok(summary)
    }

    fn export_decoded(
        &self,
        path: &Path,
        schema: &dyn Schema,
        names: &OutputNames,
        sink: &mut dyn ExportSink,
    ) -> Result<ExportSummary, ExportError> {
        let reader = FrameReader::open(path)?;
        let decoder = MessageDecoder::new(schema, self.diagnostics.clone())
            .with_policy(self.options.salvage);
        let extraction = decoder.decode_stream(reader);

        for record in &extraction.records {
            if !matches!(record.record, Record::PointCloud(_)) {
                sink.record(names, record)?;
            }
        }

        let has_clouds = extraction
            .records
            .iter()
            .any(|r| matches!(r.record, Record::PointCloud(_)));
        let (points, layout_error) = if has_clouds {
            let (accumulator, layout_error) = accumulate_point_clouds(
                &extraction.records,
                &self.point_decoder,
                &self.diagnostics,
            );
            sink.point_cloud(names, &accumulator)?;
            (accumulator.len(), layout_error)
        } else {
            (0, None)
        };

        Ok(ExportSummary {
            base_name: names.base().to_string(),
            frame_count: extraction.frame_count,
            records: extraction.records.len(),
            skipped: extraction.skipped,
            points,
            framing_error: extraction.framing_error,
            layout_error,
            aborted: extraction.aborted,
            companions: Vec::new(),
        })
    }

    fn export_companions(
        &self,
        path: &Path,
        classifier: &dyn CompanionClassifier,
        names: &OutputNames,
        sink: &mut dyn ExportSink,
    ) -> Result<ExportSummary, ExportError> {
        let correlator = CompanionFileCorrelator::new(self.diagnostics.clone());
        let set = correlator.correlate(path)?;
        let companions = classify_companions(&set, classifier);
        if companions.is_empty() {
            self.diagnostics.info(
                SOURCE,
                format!("no companions selected for {}", path.display()),
            );
        }
        sink.companions(names, &companions)?;

        Ok(ExportSummary {
            base_name: names.base().to_string(),
            companions,
            ..ExportSummary::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::tests::cloud_from_points;

    fn timed(frame_index: usize, record: Record) -> TimedRecord {
        TimedRecord {
            frame_index,
            system_timestamp: frame_index as f64 * 10.0,
            record,
        }
    }

    #[test]
    fn test_accumulates_clouds_in_frame_order() {
        let a = cloud_from_points(2, 1, &[[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);
        let b = cloud_from_points(1, 1, &[[9.0, 10.0, 11.0, 12.0]]);
        let records = vec![
            timed(0, Record::PointCloud(a)),
            timed(1, Record::Raw(vec![1])),
            timed(2, Record::PointCloud(b)),
        ];

        let (acc, failure) =
            accumulate_point_clouds(&records, &PointCloudFieldDecoder::new(), &Diagnostics::new());
        assert!(failure.is_none());
        assert_eq!(acc.len(), 3);
        assert_eq!(acc.rows()[0], [0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(acc.rows()[2], [20.0, 0.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_variable_cloud_sizes_are_exact() {
        let small = cloud_from_points(1, 1, &[[1.0; 4]]);
        let large = cloud_from_points(3, 1, &[[2.0; 4], [3.0; 4], [4.0; 4]]);
        let records = vec![
            timed(0, Record::PointCloud(small)),
            timed(1, Record::PointCloud(large)),
        ];

        let (acc, _) =
            accumulate_point_clouds(&records, &PointCloudFieldDecoder::new(), &Diagnostics::new());
        assert_eq!(acc.len(), 4);
        assert_eq!(acc.rows()[3][2], 4.0);
    }

    #[test]
    fn test_open_failure_is_an_io_error() {
        let open = FramingError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(ExportError::from(open), ExportError::Io(_)));

        let via_output = OutputError::Framing(FramingError::Io(std::io::Error::from(
            std::io::ErrorKind::NotFound,
        )));
        assert!(matches!(ExportError::from(via_output), ExportError::Io(_)));
    }

    #[test]
    fn test_bogus_geometry_is_a_layout_error() {
        let good = cloud_from_points(1, 1, &[[1.0; 4]]);
        let mut bogus = cloud_from_points(0, 1, &[]);
        bogus.width = u32::MAX;
        bogus.height = u32::MAX;
        bogus.row_step = 0;
        let records = vec![
            timed(0, Record::PointCloud(good)),
            timed(1, Record::PointCloud(bogus)),
        ];

        let (acc, failure) =
            accumulate_point_clouds(&records, &PointCloudFieldDecoder::new(), &Diagnostics::new());
        assert_eq!(acc.len(), 1);
        let (frame, error) = failure.unwrap();
        assert_eq!(frame, 1);
        assert!(matches!(error, LayoutError::RowStep { .. }));
    }

    #[test]
    fn test_layout_error_keeps_prefix() {
        let good = cloud_from_points(2, 1, &[[1.0; 4], [2.0; 4]]);
        let mut bad = cloud_from_points(1, 1, &[[3.0; 4]]);
        bad.fields[1].offset = 8;
        let after = cloud_from_points(1, 1, &[[4.0; 4]]);
        let records = vec![
            timed(0, Record::PointCloud(good)),
            timed(1, Record::PointCloud(bad)),
            timed(2, Record::PointCloud(after)),
        ];
        let diagnostics = Diagnostics::new();

        let (acc, failure) =
            accumulate_point_clouds(&records, &PointCloudFieldDecoder::new(), &diagnostics);
        assert_eq!(acc.len(), 2);
        let (frame, error) = failure.unwrap();
        assert_eq!(frame, 1);
        assert!(matches!(error, LayoutError::Offset { .. }));
        assert_eq!(diagnostics.warning_count(), 1);
    }
}
