//! Depth recording file format
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic        8 bytes  "DTREC001"
//! width        u16
//! height       u16
//! fps          u16
//! reserved     u16
//! frames       repeated until EOF:
//!   timestamp  u64      microseconds since the first frame
//!   samples    width * height u16 millimeter values, row-major
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::map::DepthMap;

pub const RECORDING_MAGIC: &[u8; 8] = b"DTREC001";
const HEADER_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Not a depth recording (bad magic)")]
    BadMagic,
    #[error("Recording header is truncated")]
    TruncatedHeader,
    #[error("Recording frame {index} is truncated")]
    TruncatedFrame { index: u64 },
    #[error("Frame is {actual_w}x{actual_h}, recording is {expected_w}x{expected_h}")]
    SizeMismatch {
        expected_w: u16,
        expected_h: u16,
        actual_w: usize,
        actual_h: usize,
    },
    #[error("Frame {width}x{height} is too large to record")]
    FrameTooLarge { width: usize, height: usize },
    #[error("Recording IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed recording parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingHeader {
    pub width: u16,
    pub height: u16,
    pub fps: u16,
}

impl RecordingHeader {
    /// Header matching the dimensions of `map`
    pub fn for_map(map: &DepthMap, fps: u16) -> Result<Self, RecordingError> {
        let too_large = || RecordingError::FrameTooLarge {
            width: map.width(),
            height: map.height(),
        };
        Ok(Self {
            width: u16::try_from(map.width()).map_err(|_| too_large())?,
            height: u16::try_from(map.height()).map_err(|_| too_large())?,
            fps,
        })
    }

    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..8].copy_from_slice(RECORDING_MAGIC);
        header[8..10].copy_from_slice(&self.width.to_le_bytes());
        header[10..12].copy_from_slice(&self.height.to_le_bytes());
        header[12..14].copy_from_slice(&self.fps.to_le_bytes());
        // bytes 14..16 reserved
        header
    }

    fn decode(data: &[u8; HEADER_LEN]) -> Result<Self, RecordingError> {
        if &data[..8] != RECORDING_MAGIC {
            return Err(RecordingError::BadMagic);
        }
        Ok(Self {
            width: u16::from_le_bytes([data[8], data[9]]),
            height: u16::from_le_bytes([data[10], data[11]]),
            fps: u16::from_le_bytes([data[12], data[13]]),
        })
    }

    fn samples_per_frame(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub timestamp_us: u64,
    pub depth: DepthMap,
}

/// Appends depth frames to a recording
pub struct RecordingWriter<W: Write> {
    inner: W,
    header: RecordingHeader,
    frames: u64,
}

impl RecordingWriter<BufWriter<File>> {
    /// Create (or truncate) a recording file
    pub fn create(path: &Path, header: RecordingHeader) -> Result<Self, RecordingError> {
        let file = File::create(path)?;
        debug!(path = %path.display(), width = header.width, height = header.height, "Creating recording");
        Self::new(BufWriter::new(file), header)
    }
}

impl<W: Write> RecordingWriter<W> {
    pub fn new(mut inner: W, header: RecordingHeader) -> Result<Self, RecordingError> {
        inner.write_all(&header.encode())?;
        Ok(Self {
            inner,
            header,
            frames: 0,
        })
    }

    pub fn header(&self) -> RecordingHeader {
        self.header
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn write_frame(&mut self, timestamp_us: u64, depth: &DepthMap) -> Result<(), RecordingError> {
        if depth.width() != self.header.width as usize || depth.height() != self.header.height as usize {
            return Err(RecordingError::SizeMismatch {
                expected_w: self.header.width,
                expected_h: self.header.height,
                actual_w: depth.width(),
                actual_h: depth.height(),
            });
        }

        let mut buf = Vec::with_capacity(8 + depth.samples().len() * 2);
        buf.extend_from_slice(&timestamp_us.to_le_bytes());
        for sample in depth.samples() {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        self.inner.write_all(&buf)?;
        self.frames += 1;
        Ok(())
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> Result<W, RecordingError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Sequential reader over a recording
pub struct RecordingReader<R: Read> {
    inner: R,
    header: RecordingHeader,
    next_index: u64,
}

impl RecordingReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> RecordingReader<R> {
    pub fn new(mut inner: R) -> Result<Self, RecordingError> {
        let mut raw = [0u8; HEADER_LEN];
        inner.read_exact(&mut raw).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => RecordingError::TruncatedHeader,
            _ => RecordingError::Io(e),
        })?;
        let header = RecordingHeader::decode(&raw)?;
        Ok(Self {
            inner,
            header,
            next_index: 0,
        })
    }

    pub fn header(&self) -> RecordingHeader {
        self.header
    }

    /// Next frame, or `None` at a clean end of file
    pub fn next_frame(&mut self) -> Result<Option<RecordedFrame>, RecordingError> {
        let index = self.next_index;
        let mut ts = [0u8; 8];
        let read = read_fully(&mut self.inner, &mut ts)?;
        if read == 0 {
            return Ok(None);
        }
        if read < ts.len() {
            return Err(RecordingError::TruncatedFrame { index });
        }

        let mut raw = vec![0u8; self.header.samples_per_frame() * 2];
        if read_fully(&mut self.inner, &mut raw)? < raw.len() {
            return Err(RecordingError::TruncatedFrame { index });
        }
        let samples = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let depth = DepthMap::new(
            self.header.width as usize,
            self.header.height as usize,
            samples,
        )
        .ok_or(RecordingError::TruncatedFrame { index })?;

        self.next_index += 1;
        Ok(Some(RecordedFrame {
            timestamp_us: u64::from_le_bytes(ts),
            depth,
        }))
    }

    /// Decode every remaining frame
    pub fn read_all(&mut self) -> Result<Vec<RecordedFrame>, RecordingError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
