//! positional weight loading. `DataReader` is the abstract byte
//! source; `InitializerFromDataReader` turns a run of bytes into the next
//! weight tensor a layer asks for, in the exact order `Net::load_weight`
//! walks the compiled layer list.

use std::io::Read;

use crate::dtype::ScalarType;
use crate::error::{GPError, GPResult};
use crate::tensor::Tensor;

pub trait DataReader {
    /// Fills `buf` completely or fails with `ShortRead`.
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> GPResult<()>;
}

pub struct DataReaderFromStdio<R: Read> {
    inner: R,
}

impl<R: Read> DataReaderFromStdio<R> {
    pub fn new(inner: R) -> Self {
        DataReaderFromStdio { inner }
    }
}

impl<R: Read> DataReader for DataReaderFromStdio<R> {
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> GPResult<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(GPError::ShortRead { requested: buf.len(), got: 0 })
            }
            Err(e) => Err(GPError::Io(e)),
        }
    }
}

/// Reads the two-int version banner (`major`, `minor`, little-endian) a
/// weight stream starts with.
pub fn read_version_banner(reader: &mut dyn DataReader) -> GPResult<(i32, i32)> {
    let mut buf = [0u8; 8];
    reader.read_exact_bytes(&mut buf)?;
    let major = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    let minor = i32::from_le_bytes(buf[4..8].try_into().unwrap());
    Ok((major, minor))
}

/// Pulls the next tensor of `shape` (always `Float`, little-endian) off
/// the reader.
pub struct InitializerFromDataReader<'a> {
    reader: &'a mut dyn DataReader,
}

impl<'a> InitializerFromDataReader<'a> {
    pub fn new(reader: &'a mut dyn DataReader) -> Self {
        InitializerFromDataReader { reader }
    }

    pub fn load(&mut self, shape: &[i64]) -> GPResult<Tensor> {
        let numel: i64 = shape.iter().product();
        let mut bytes = vec![0u8; numel as usize * ScalarType::Float.size()];
        self.reader.read_exact_bytes(&mut bytes)?;
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Tensor::from_f32_slice(&floats, shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_decodes_major_minor() {
        let bytes: [u8; 8] = [0x01, 0, 0, 0, 0x02, 0, 0, 0];
        let mut reader = DataReaderFromStdio::new(std::io::Cursor::new(bytes));
        let (major, minor) = read_version_banner(&mut reader).unwrap();
        assert_eq!((major, minor), (1, 2));
    }

    #[test]
    fn truncated_stream_is_short_read() {
        let mut reader = DataReaderFromStdio::new(std::io::Cursor::new([0u8; 2]));
        let mut init = InitializerFromDataReader::new(&mut reader);
        assert!(matches!(init.load(&[4]), Err(GPError::ShortRead { .. })));
    }
}
