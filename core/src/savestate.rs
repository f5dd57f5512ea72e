//! Tagged-primitive savestate stream. A save is a sequence of component
//! blocks, each starting with a short literal tag; load verifies tags in the
//! order they were written, matching §3's "Save-state stream" data model.

use crate::error::SaveStateError;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

pub struct SaveWriter<W: Write> {
    inner: GzEncoder<W>,
}

impl<W: Write> SaveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            inner: GzEncoder::new(sink, Compression::default()),
        }
    }

    pub fn tag(&mut self, name: &str) -> io::Result<()> {
        self.u8(name.len() as u8)?;
        self.inner.write_all(name.as_bytes())
    }

    pub fn u8(&mut self, v: u8) -> io::Result<()> {
        self.inner.write_all(&[v])
    }

    pub fn u16(&mut self, v: u16) -> io::Result<()> {
        self.inner.write_all(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> io::Result<()> {
        self.inner.write_all(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> io::Result<()> {
        self.inner.write_all(&v.to_le_bytes())
    }

    pub fn i32(&mut self, v: i32) -> io::Result<()> {
        self.u32(v as u32)
    }

    pub fn array_u32(&mut self, vals: &[u32]) -> io::Result<()> {
        for &v in vals {
            self.u32(v)?;
        }
        Ok(())
    }

    pub fn bytes(&mut self, vals: &[u8]) -> io::Result<()> {
        self.inner.write_all(vals)
    }

    pub fn finalise(self) -> io::Result<W> {
        self.inner.finish()
    }
}

pub struct SaveReader<R: Read> {
    inner: GzDecoder<R>,
}

impl<R: Read> SaveReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: GzDecoder::new(source),
        }
    }

    pub fn tag(&mut self, expected: &'static str) -> Result<(), SaveStateError> {
        let len = self.u8().map_err(|_| SaveStateError::UnexpectedEof)? as usize;
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| SaveStateError::UnexpectedEof)?;
        let found = String::from_utf8_lossy(&buf).into_owned();
        if found == expected {
            Ok(())
        } else {
            Err(SaveStateError::TagMismatch { expected, found })
        }
    }

    pub fn u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn i32(&mut self) -> io::Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn array_u32(&mut self, out: &mut [u32]) -> io::Result<()> {
        for slot in out.iter_mut() {
            *slot = self.u32()?;
        }
        Ok(())
    }

    pub fn bytes(&mut self, out: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_tagged_stream() {
        let mut w = SaveWriter::new(Vec::new());
        w.tag("CPU").unwrap();
        w.u32(0x1234).unwrap();
        w.array_u32(&[1, 2, 3]).unwrap();
        let buf = w.finalise().unwrap();

        let mut r = SaveReader::new(&buf[..]);
        r.tag("CPU").unwrap();
        assert_eq!(r.u32().unwrap(), 0x1234);
        let mut arr = [0u32; 3];
        r.array_u32(&mut arr).unwrap();
        assert_eq!(arr, [1, 2, 3]);
    }

    #[test]
    fn tag_mismatch_is_detected() {
        let mut w = SaveWriter::new(Vec::new());
        w.tag("PPU").unwrap();
        let buf = w.finalise().unwrap();

        let mut r = SaveReader::new(&buf[..]);
        let err = r.tag("CPU").unwrap_err();
        assert!(matches!(err, SaveStateError::TagMismatch { .. }));
    }
}
