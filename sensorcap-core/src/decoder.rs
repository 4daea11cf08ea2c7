//! Per-sensor message decoding with a salvage policy.
//!
//! A [`MessageDecoder`] is bound to exactly one [`Schema`] for the whole of a
//! file's extraction. It pulls frames from a [`FrameReader`], decodes each
//! payload and, by default, skips payloads the schema rejects so one bad
//! record does not cost the rest of the file.

use crate::diagnostics::Diagnostics;
use crate::frame::{FrameReader, FramingError};
use crate::types::{Record, TimedRecord};
use std::io::Read;
use thiserror::Error;
use tracing::debug;

const SOURCE: &str = "decoder";

/// Reason a schema refused a payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SchemaError {
    message: String,
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A malformed single payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("schema `{schema}` rejected payload of {payload_len} bytes: {reason}")]
pub struct DecodeError {
    pub schema: String,
    pub payload_len: usize,
    #[source]
    pub reason: SchemaError,
}

/// Turns one payload into a typed [`Record`].
///
/// Implementations are normally generated from the instrument's message
/// schema and supplied by the caller.
pub trait Schema {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    fn decode(&self, payload: &[u8]) -> Result<Record, SchemaError>;
}

/// Schema that passes every payload through as [`Record::Raw`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSchema;

impl Schema for RawSchema {
    fn name(&self) -> &str {
        "raw"
    }

    fn decode(&self, payload: &[u8]) -> Result<Record, SchemaError> {
        Ok(Record::Raw(payload.to_vec()))
    }
}

/// Adapts a closure into a [`Schema`].
pub struct FnSchema<F> {
    name: String,
    decode: F,
}

impl<F> Schema for FnSchema<F>
where
    F: Fn(&[u8]) -> Result<Record, SchemaError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, payload: &[u8]) -> Result<Record, SchemaError> {
        (self.decode)(payload)
    }
}

/// Builds a named [`Schema`] from a decode function.
pub fn schema_fn<F>(name: impl Into<String>, decode: F) -> FnSchema<F>
where
    F: Fn(&[u8]) -> Result<Record, SchemaError>,
{
    FnSchema {
        name: name.into(),
        decode,
    }
}

/// What to do when a payload fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SalvagePolicy {
    /// Report the error, drop the record and continue with the next frame
    #[default]
    SkipRecord,
    /// Report the error and stop reading the file
    AbortFile,
}

/// A frame whose payload was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFrame {
    pub frame_index: usize,
    pub timestamp: f64,
    pub error: DecodeError,
}

/// Everything recovered from one container.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Decoded records in frame order
    pub records: Vec<TimedRecord>,
    /// Rejected frames in frame order
    pub skipped: Vec<SkippedFrame>,
    /// Frames read from the container, decoded or not
    pub frame_count: usize,
    /// Set when the container ended mid-frame; `records` is then partial
    pub framing_error: Option<FramingError>,
    /// Set when [`SalvagePolicy::AbortFile`] stopped the extraction
    pub aborted: bool,
}

impl Extraction {
    /// True when every frame was read and none was rejected.
    pub fn is_complete(&self) -> bool {
        self.framing_error.is_none() && self.skipped.is_empty() && !self.aborted
    }
}

/// Decoder bound to one schema for one file.
pub struct MessageDecoder<'s> {
    schema: &'s dyn Schema,
    policy: SalvagePolicy,
    diagnostics: Diagnostics,
}

impl<'s> MessageDecoder<'s> {
    pub fn new(schema: &'s dyn Schema, diagnostics: Diagnostics) -> Self {
        Self {
            schema,
            policy: SalvagePolicy::default(),
            diagnostics,
        }
    }

    pub fn with_policy(mut self, policy: SalvagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schema_name(&self) -> &str {
        self.schema.name()
    }

    /// Decodes one payload.
    pub fn decode(&self, payload: &[u8]) -> Result<Record, DecodeError> {
        self.schema.decode(payload).map_err(|reason| DecodeError {
            schema: self.schema.name().to_string(),
            payload_len: payload.len(),
            reason,
        })
    }

    /// Reads every frame from `reader` and decodes it.
    ///
    /// Framing errors end the extraction but keep the records decoded so
    /// far. Decode errors follow the salvage policy.
    pub fn decode_stream<R: Read>(&self, mut reader: FrameReader<R>) -> Extraction {
        let mut extraction = Extraction::default();

        loop {
            let frame = match reader.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.diagnostics
                        .warn(SOURCE, format!("container truncated, keeping partial result: {}", e));
                    extraction.framing_error = Some(e);
                    break;
                }
            };
            let frame_index = extraction.frame_count;
            extraction.frame_count += 1;

            match self.decode(&frame.payload) {
                Ok(record) => extraction.records.push(TimedRecord {
                    frame_index,
                    system_timestamp: frame.timestamp,
                    record,
                }),
                Err(error) => {
                    self.diagnostics
                        .warn(SOURCE, format!("frame {}: {}", frame_index, error));
                    extraction.skipped.push(SkippedFrame {
                        frame_index,
                        timestamp: frame.timestamp,
                        error,
                    });
                    if self.policy == SalvagePolicy::AbortFile {
                        extraction.aborted = true;
                        break;
                    }
                }
            }
        }

        debug!(
            schema = self.schema.name(),
            frames = extraction.frame_count,
            records = extraction.records.len(),
            skipped = extraction.skipped.len(),
            "extraction finished"
        );
        extraction
    }
}
