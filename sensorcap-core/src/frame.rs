//! Sequential reader and writer for the shared capture container.
//!
//! Every instrument writes the same framing:
//!
//! ```text
//! [f64 LE timestamp][u32 LE length N][N bytes payload] ...
//! ```
//!
//! End of file exactly at a frame boundary is a clean end of stream. End of
//! file anywhere inside a frame is a [`FramingError`].

use crate::types::Frame;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Size of the timestamp field in bytes.
pub const TIMESTAMP_SIZE: usize = 8;
/// Size of the length field in bytes.
pub const LENGTH_SIZE: usize = 4;

/// Upper bound on the up-front payload allocation. Larger payloads grow as
/// bytes actually arrive, so a corrupt length cannot force a huge allocation.
const MAX_PREALLOC: usize = 1 << 20;

/// Part of a frame that was being read when the input ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    Timestamp,
    Length,
    Payload,
}

impl fmt::Display for FramePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => f.write_str("timestamp"),
            Self::Length => f.write_str("length"),
            Self::Payload => f.write_str("payload"),
        }
    }
}

/// Errors raised while reading the container framing.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(
        "truncated {part} in frame {frame} at byte {offset}: expected {expected} bytes, got {got}"
    )]
    Truncated {
        frame: usize,
        offset: u64,
        part: FramePart,
        expected: u64,
        got: u64,
    },
}

/// Reads [`Frame`]s one after another from a byte stream.
///
/// The reader never seeks; each call to [`FrameReader::next_frame`] consumes
/// exactly one frame. After an error the reader is finished and yields
/// nothing more.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    frame_index: usize,
    offset: u64,
    finished: bool,
}

impl FrameReader<BufReader<File>> {
    /// Opens a container file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FramingError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> FrameReader<R> {
    /// Wraps an arbitrary reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frame_index: 0,
            offset: 0,
            finished: false,
        }
    }

    /// Index the next frame will have.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next frame, or `Ok(None)` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.finished {
            return Ok(None);
        }
        let result = self.read_frame();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        let mut timestamp_bytes = [0u8; TIMESTAMP_SIZE];
        let got = self.read_exact_or_eof(&mut timestamp_bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < TIMESTAMP_SIZE {
            return Err(self.truncated(FramePart::Timestamp, TIMESTAMP_SIZE as u64, got as u64));
        }
        let timestamp = LittleEndian::read_f64(&timestamp_bytes);

        let mut length_bytes = [0u8; LENGTH_SIZE];
        let got = self.read_exact_or_eof(&mut length_bytes)?;
        if got < LENGTH_SIZE {
            return Err(self.truncated(FramePart::Length, LENGTH_SIZE as u64, got as u64));
        }
        let length = LittleEndian::read_u32(&length_bytes) as u64;

        let mut payload = Vec::with_capacity((length as usize).min(MAX_PREALLOC));
        let got = self.reader.by_ref().take(length).read_to_end(&mut payload)? as u64;
        self.offset += got;
        if got < length {
            return Err(self.truncated(FramePart::Payload, length, got));
        }

        self.frame_index += 1;
        Ok(Some(Frame::new(timestamp, payload)))
    }

    /// Fills `buf` unless the stream ends first; returns the bytes read.
    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    fn truncated(&self, part: FramePart, expected: u64, got: u64) -> FramingError {
        FramingError::Truncated {
            frame: self.frame_index,
            offset: self.offset,
            part,
            expected,
            got,
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Writes frames in the container format.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl FrameWriter<File> {
    /// Creates (or truncates) a container file.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Appends one frame.
    pub fn write_frame(&mut self, timestamp: f64, payload: &[u8]) -> io::Result<()> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds u32 length field", payload.len()),
            )
        })?;
        self.writer.write_f64::<LittleEndian>(timestamp)?;
        self.writer.write_u32::<LittleEndian>(length)?;
        self.writer.write_all(payload)?;
        Ok(())
    }

    /// Flushes buffered frames.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

/// Counts the frames in a container file without keeping payloads.
pub fn frame_count<P: AsRef<Path>>(path: P) -> Result<usize, FramingError> {
    let mut reader = FrameReader::open(path)?;
    let mut count = 0;
    while reader.next_frame()?.is_some() {
        count += 1;
    }
    Ok(count)
}
