/// Read and patch SEG-Y rev 0/1 files on the trace-header level
///
/// Only headers are ever interpreted or rewritten; sample data is skipped
/// over and left untouched. All multi-byte fields are big-endian.
use std::fs::OpenOptions;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

pub const TEXTUAL_HEADER_BYTES: u64 = 3200;
pub const BINARY_HEADER_BYTES: u64 = 400;
pub const FILE_HEADER_BYTES: u64 = TEXTUAL_HEADER_BYTES + BINARY_HEADER_BYTES;
pub const TRACE_HEADER_BYTES: usize = 240;

// Offsets within the 400-byte binary file header
const BIN_SAMPLE_INTERVAL: usize = 16;
const BIN_SAMPLES_PER_TRACE: usize = 20;
const BIN_FORMAT_CODE: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum SegyError {
    #[error("{0:?}: file is {1} bytes; a SEG-Y file header is {FILE_HEADER_BYTES} bytes")]
    TooShort(PathBuf, u64),

    #[error("{0:?}: unsupported data sample format code {1}")]
    UnsupportedFormat(PathBuf, i16),

    #[error("{0:?}: no sample count in the binary header nor in the first trace header")]
    NoSampleCount(PathBuf),

    #[error(
        "{0:?}: trace data is not a whole number of {1}-byte trace records ({2} trailing bytes)"
    )]
    InconsistentLength(PathBuf, usize, u64),

    #[error("trace index {0} out of bounds ({1} traces)")]
    TraceOutOfBounds(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The trace-header fields that navigation repair reads or writes
///
/// The discriminants are the 0-based byte offsets within the 240-byte header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TraceField {
    /// Original field record (shot) number, "FFID"
    FieldRecord = 8,
    Cdp = 20,
    /// Scalar applied to all coordinate fields; negative means divide
    SourceGroupScalar = 70,
    SourceX = 72,
    SourceY = 76,
    GroupX = 80,
    NumSamples = 114,
    Year = 156,
    DayOfYear = 158,
    Hour = 160,
    Minute = 162,
    Second = 164,
    CdpX = 180,
    CdpY = 184,
    Inline3d = 188,
}

impl TraceField {
    fn offset(&self) -> usize {
        *self as usize
    }

    /// Field width in bytes
    fn width(&self) -> usize {
        match self {
            TraceField::SourceGroupScalar
            | TraceField::NumSamples
            | TraceField::Year
            | TraceField::DayOfYear
            | TraceField::Hour
            | TraceField::Minute
            | TraceField::Second => 2,
            _ => 4,
        }
    }
}

/// One raw 240-byte trace header image
#[derive(Debug, Clone)]
pub struct TraceHeader {
    raw: [u8; TRACE_HEADER_BYTES],
}

impl TraceHeader {
    pub fn from_bytes(raw: [u8; TRACE_HEADER_BYTES]) -> Self {
        Self { raw }
    }

    pub fn get(&self, field: TraceField) -> i32 {
        let offset = field.offset();
        match field.width() {
            2 => BigEndian::read_i16(&self.raw[offset..offset + 2]) as i32,
            _ => BigEndian::read_i32(&self.raw[offset..offset + 4]),
        }
    }

    pub fn set(&mut self, field: TraceField, value: i32) {
        let offset = field.offset();
        match field.width() {
            2 => BigEndian::write_i16(&mut self.raw[offset..offset + 2], value as i16),
            _ => BigEndian::write_i32(&mut self.raw[offset..offset + 4], value),
        }
    }
}

/// A SEG-Y file with all trace headers held in memory
///
/// Headers modified through [`SegyFile::set`] are only written back to disk
/// when [`SegyFile::save`] is called, and only the modified ones are.
pub struct SegyFile {
    pub path: PathBuf,
    pub samples_per_trace: u16,
    pub format_code: i16,
    pub sample_interval_us: u16,
    headers: Vec<TraceHeader>,
    modified: Vec<bool>,
}

/// Bytes per data sample for a SEG-Y data sample format code
fn bytes_per_sample(format_code: i16) -> Option<usize> {
    match format_code {
        1 | 2 | 4 | 5 => Some(4),
        3 => Some(2),
        8 => Some(1),
        _ => None,
    }
}

impl SegyFile {
    /// Open a SEG-Y file and read every trace header
    ///
    /// The trace length is taken from the binary header, falling back on the
    /// first trace header's NumSamples field when the binary header carries
    /// zero. A file size that is not a whole number of trace records is an
    /// error rather than a truncated read.
    pub fn open(path: &Path) -> Result<SegyFile, SegyError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < FILE_HEADER_BYTES {
            return Err(SegyError::TooShort(path.to_path_buf(), file_size));
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(TEXTUAL_HEADER_BYTES))?;

        let mut binary_header = [0_u8; BINARY_HEADER_BYTES as usize];
        reader.read_exact(&mut binary_header)?;

        let sample_interval_us =
            BigEndian::read_i16(&binary_header[BIN_SAMPLE_INTERVAL..BIN_SAMPLE_INTERVAL + 2]) as u16;
        let mut samples_per_trace =
            BigEndian::read_i16(&binary_header[BIN_SAMPLES_PER_TRACE..BIN_SAMPLES_PER_TRACE + 2]) as u16;
        let format_code = BigEndian::read_i16(&binary_header[BIN_FORMAT_CODE..BIN_FORMAT_CODE + 2]);

        let sample_bytes = bytes_per_sample(format_code)
            .ok_or_else(|| SegyError::UnsupportedFormat(path.to_path_buf(), format_code))?;

        if samples_per_trace == 0 {
            // Some legacy writers leave the binary header empty
            if file_size < FILE_HEADER_BYTES + TRACE_HEADER_BYTES as u64 {
                return Err(SegyError::NoSampleCount(path.to_path_buf()));
            }
            let mut first_header = [0_u8; TRACE_HEADER_BYTES];
            reader.read_exact(&mut first_header)?;
            samples_per_trace = TraceHeader::from_bytes(first_header).get(TraceField::NumSamples) as u16;
            reader.seek(SeekFrom::Start(FILE_HEADER_BYTES))?;

            if samples_per_trace == 0 {
                return Err(SegyError::NoSampleCount(path.to_path_buf()));
            }
        }

        let record_bytes = TRACE_HEADER_BYTES + samples_per_trace as usize * sample_bytes;
        let data_bytes = file_size - FILE_HEADER_BYTES;
        if data_bytes % record_bytes as u64 != 0 {
            return Err(SegyError::InconsistentLength(
                path.to_path_buf(),
                record_bytes,
                data_bytes % record_bytes as u64,
            ));
        }
        let n_traces = (data_bytes / record_bytes as u64) as usize;

        let mut headers = Vec::<TraceHeader>::with_capacity(n_traces);
        let mut raw = [0_u8; TRACE_HEADER_BYTES];
        for i in 0..n_traces {
            reader.seek(SeekFrom::Start(
                FILE_HEADER_BYTES + (i * record_bytes) as u64,
            ))?;
            reader.read_exact(&mut raw)?;
            headers.push(TraceHeader::from_bytes(raw));
        }

        Ok(SegyFile {
            path: path.to_path_buf(),
            samples_per_trace,
            format_code,
            sample_interval_us,
            modified: vec![false; headers.len()],
            headers,
        })
    }

    pub fn n_traces(&self) -> usize {
        self.headers.len()
    }

    pub fn header(&self, trace_n: usize) -> Result<&TraceHeader, SegyError> {
        self.headers
            .get(trace_n)
            .ok_or(SegyError::TraceOutOfBounds(trace_n, self.headers.len()))
    }

    pub fn get(&self, trace_n: usize, field: TraceField) -> Result<i32, SegyError> {
        Ok(self.header(trace_n)?.get(field))
    }

    /// Read one field from every trace header
    pub fn get_all(&self, field: TraceField) -> Vec<i32> {
        self.headers.iter().map(|header| header.get(field)).collect()
    }

    pub fn set(&mut self, trace_n: usize, field: TraceField, value: i32) -> Result<(), SegyError> {
        let n_traces = self.headers.len();
        let header = self
            .headers
            .get_mut(trace_n)
            .ok_or(SegyError::TraceOutOfBounds(trace_n, n_traces))?;
        header.set(field, value);
        self.modified[trace_n] = true;
        Ok(())
    }

    /// Byte offset of a trace header within the file
    fn header_offset(&self, trace_n: usize) -> u64 {
        let sample_bytes = bytes_per_sample(self.format_code).unwrap_or(4);
        let record_bytes = TRACE_HEADER_BYTES + self.samples_per_trace as usize * sample_bytes;
        FILE_HEADER_BYTES + (trace_n * record_bytes) as u64
    }

    /// Write every modified trace header back to its place in the file
    ///
    /// # Returns
    /// The number of headers that were rewritten.
    pub fn save(&mut self) -> Result<usize, SegyError> {
        if !self.modified.iter().any(|m| *m) {
            return Ok(0);
        }

        let mut file = OpenOptions::new().write(true).open(&self.path)?;

        let mut n_written = 0_usize;
        for i in 0..self.headers.len() {
            if !self.modified[i] {
                continue;
            }
            file.seek(SeekFrom::Start(self.header_offset(i)))?;
            file.write_all(&self.headers[i].raw)?;
            self.modified[i] = false;
            n_written += 1;
        }
        file.flush()?;

        Ok(n_written)
    }
}

impl std::fmt::Display for SegyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "
SEG-Y file
----------
Filepath:\t\t{:?}
Traces:\t\t\t{}
Samples per trace:\t{}
Sample interval:\t{} us
Sample format code:\t{}
",
            self.path,
            self.n_traces(),
            self.samples_per_trace,
            self.sample_interval_us,
            self.format_code,
        )
    }
}

#[cfg(test)]
pub mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use byteorder::{BigEndian, ByteOrder};

    use super::{SegyError, SegyFile, TraceField, FILE_HEADER_BYTES, TRACE_HEADER_BYTES};

    /// Write a minimal SEG-Y file with the given per-trace header fields
    pub fn write_test_segy(
        dir: &std::path::Path,
        filename: &str,
        samples_per_trace: u16,
        trace_fields: &[Vec<(TraceField, i32)>],
    ) -> PathBuf {
        let path = dir.join(filename);
        let mut file = std::fs::File::create(&path).unwrap();

        let mut file_header = vec![0_u8; FILE_HEADER_BYTES as usize];
        BigEndian::write_i16(&mut file_header[3216..3218], 1000); // 1 ms sample interval
        BigEndian::write_i16(&mut file_header[3220..3222], samples_per_trace as i16);
        BigEndian::write_i16(&mut file_header[3224..3226], 3); // 2-byte integer samples
        file.write_all(&file_header).unwrap();

        for fields in trace_fields {
            let mut trace_header = super::TraceHeader::from_bytes([0_u8; TRACE_HEADER_BYTES]);
            trace_header.set(TraceField::NumSamples, samples_per_trace as i32);
            for (field, value) in fields {
                trace_header.set(*field, *value);
            }
            file.write_all(&trace_header.raw).unwrap();

            // Sample data; the values are never read back
            file.write_all(&vec![0_u8; samples_per_trace as usize * 2]).unwrap();
        }
        path
    }

    #[test]
    fn test_open_and_read() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_test_segy(
            dir.path(),
            "test.sgy",
            100,
            &[
                vec![(TraceField::FieldRecord, 1), (TraceField::Year, 90)],
                vec![(TraceField::FieldRecord, 2), (TraceField::Year, 90)],
                vec![(TraceField::FieldRecord, 3), (TraceField::Year, 0)],
            ],
        );

        let segy = SegyFile::open(&path).unwrap();

        assert_eq!(segy.n_traces(), 3);
        assert_eq!(segy.samples_per_trace, 100);
        assert_eq!(segy.format_code, 3);
        assert_eq!(segy.sample_interval_us, 1000);

        assert_eq!(segy.get_all(TraceField::FieldRecord), vec![1, 2, 3]);
        assert_eq!(segy.get_all(TraceField::Year), vec![90, 90, 0]);
        assert_eq!(segy.get(0, TraceField::SourceX).unwrap(), 0);
    }

    #[test]
    fn test_patch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_test_segy(
            dir.path(),
            "patch.sgy",
            50,
            &[vec![], vec![], vec![]],
        );

        let mut segy = SegyFile::open(&path).unwrap();
        segy.set(1, TraceField::SourceX, 58724638).unwrap();
        segy.set(1, TraceField::SourceY, 407482100).unwrap();
        segy.set(1, TraceField::SourceGroupScalar, -100).unwrap();
        assert_eq!(segy.save().unwrap(), 1);

        // Saving again writes nothing
        assert_eq!(segy.save().unwrap(), 0);

        let reread = SegyFile::open(&path).unwrap();
        assert_eq!(reread.get(1, TraceField::SourceX).unwrap(), 58724638);
        assert_eq!(reread.get(1, TraceField::SourceY).unwrap(), 407482100);
        assert_eq!(reread.get(1, TraceField::SourceGroupScalar).unwrap(), -100);
        // Untouched traces stay untouched
        assert_eq!(reread.get(0, TraceField::SourceX).unwrap(), 0);
        assert_eq!(reread.get(2, TraceField::SourceGroupScalar).unwrap(), 0);
    }

    #[test]
    fn test_inconsistent_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_segy(dir.path(), "bad.sgy", 100, &[vec![], vec![]]);

        // Chop off part of the last trace record
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

        match SegyFile::open(&path) {
            Err(SegyError::InconsistentLength(_, _, _)) => (),
            other => panic!("Expected InconsistentLength, got {:?}", other.map(|f| f.n_traces())),
        }
    }

    #[test]
    fn test_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.sgy");
        std::fs::write(&path, [0_u8; 100]).unwrap();

        assert!(matches!(
            SegyFile::open(&path),
            Err(SegyError::TooShort(_, 100))
        ));
    }
}
