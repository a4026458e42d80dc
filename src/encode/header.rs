// src/encode/header.rs

//! Fixed-size stream header preceding the coded bits.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::transform::dwt::MAX_LEVELS;
use crate::transform::{Boundary, FilterFamily, Wavelet};
use crate::utils::buffer::Dims;

pub const MAGIC: [u8; 4] = *b"SPKW";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

const FLAG_ALL_ZERO: u8 = 0x01;
const FLAG_OUTLIERS: u8 = 0x02;
const UNBOUNDED_FLOOR: i32 = i32::MIN;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported stream version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("invalid header field `{field}` = {value}")]
    InvalidField { field: &'static str, value: i64 },
}

/// Shape of the coded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Image,
    VolumeDyadic,
    VolumePacket,
}

impl StreamKind {
    fn id(self) -> u8 {
        match self {
            StreamKind::Image => 0,
            StreamKind::VolumeDyadic => 1,
            StreamKind::VolumePacket => 2,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(StreamKind::Image),
            1 => Some(StreamKind::VolumeDyadic),
            2 => Some(StreamKind::VolumePacket),
            _ => None,
        }
    }
}

/// Arithmetic used by the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Realization {
    #[default]
    Float,
    /// Reversible integer lifting.
    Integer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub kind: StreamKind,
    pub wavelet: Wavelet,
    pub realization: Realization,
    /// No coefficient was ever significant; nothing follows the header.
    pub all_zero: bool,
    /// An outlier correction section and its length trailer follow the coded bits.
    pub has_outliers: bool,
    pub num_levels: u8,
    pub temporal_levels: u8,
    pub dims: Dims,
    pub mean: f64,
    /// `floor(log2(max |c|))`, the first coded bit-plane.
    pub max_coefficient_bits: i32,
    /// Last bit-plane the encoder was allowed to code.
    pub min_bitplane: Option<i32>,
}

impl Header {
    /// Encoded size in bytes.
    pub const LEN: usize = 41;

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), HeaderError> {
        w.write_all(&MAGIC)?;
        w.write_u8(VERSION_MAJOR)?;
        w.write_u8(VERSION_MINOR)?;
        w.write_u8(self.kind.id())?;
        w.write_u8(self.wavelet.family().id())?;
        w.write_u8(self.wavelet.boundary().id())?;
        w.write_u8(match self.realization {
            Realization::Float => 0,
            Realization::Integer => 1,
        })?;
        let mut flags = 0;
        if self.all_zero {
            flags |= FLAG_ALL_ZERO;
        }
        if self.has_outliers {
            flags |= FLAG_OUTLIERS;
        }
        w.write_u8(flags)?;
        w.write_u8(self.num_levels)?;
        w.write_u8(self.temporal_levels)?;
        for extent in [self.dims.frames, self.dims.rows, self.dims.cols] {
            let extent = u32::try_from(extent).map_err(|_| HeaderError::InvalidField {
                field: "dims",
                value: extent as i64,
            })?;
            w.write_u32::<BigEndian>(extent)?;
        }
        w.write_f64::<BigEndian>(self.mean)?;
        w.write_i32::<BigEndian>(self.max_coefficient_bits)?;
        w.write_i32::<BigEndian>(self.min_bitplane.unwrap_or(UNBOUNDED_FLOOR))?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        let major = r.read_u8()?;
        let minor = r.read_u8()?;
        if major != VERSION_MAJOR {
            return Err(HeaderError::UnsupportedVersion { major, minor });
        }

        let invalid = |field: &'static str, value: u8| HeaderError::InvalidField {
            field,
            value: value as i64,
        };
        let kind_id = r.read_u8()?;
        let kind = StreamKind::from_id(kind_id).ok_or_else(|| invalid("kind", kind_id))?;
        let family_id = r.read_u8()?;
        let family = FilterFamily::from_id(family_id).ok_or_else(|| invalid("wavelet", family_id))?;
        let boundary_id = r.read_u8()?;
        let boundary = Boundary::from_id(boundary_id).ok_or_else(|| invalid("boundary", boundary_id))?;
        let realization = match r.read_u8()? {
            0 => Realization::Float,
            1 => Realization::Integer,
            other => return Err(invalid("realization", other)),
        };
        let flags = r.read_u8()?;
        if flags & !(FLAG_ALL_ZERO | FLAG_OUTLIERS) != 0 {
            return Err(invalid("flags", flags));
        }
        let num_levels = r.read_u8()?;
        let temporal_levels = r.read_u8()?;
        for (field, levels) in [("num_levels", num_levels), ("temporal_levels", temporal_levels)] {
            if levels as u32 > MAX_LEVELS {
                return Err(invalid(field, levels));
            }
        }

        let frames = r.read_u32::<BigEndian>()? as usize;
        let rows = r.read_u32::<BigEndian>()? as usize;
        let cols = r.read_u32::<BigEndian>()? as usize;
        let dims = Dims::volume(frames, rows, cols);
        if dims.validate().is_err() {
            return Err(HeaderError::InvalidField {
                field: "dims",
                value: frames.saturating_mul(rows).saturating_mul(cols) as i64,
            });
        }

        let mean = r.read_f64::<BigEndian>()?;
        if !mean.is_finite() {
            return Err(HeaderError::InvalidField {
                field: "mean",
                value: mean.to_bits() as i64,
            });
        }
        let max_coefficient_bits = r.read_i32::<BigEndian>()?;
        let floor = r.read_i32::<BigEndian>()?;

        Ok(Self {
            kind,
            wavelet: Wavelet::new(family, boundary),
            realization,
            all_zero: flags & FLAG_ALL_ZERO != 0,
            has_outliers: flags & FLAG_OUTLIERS != 0,
            num_levels,
            temporal_levels,
            dims,
            mean,
            max_coefficient_bits,
            min_bitplane: (floor != UNBOUNDED_FLOOR).then_some(floor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Header {
        Header {
            kind: StreamKind::VolumePacket,
            wavelet: Wavelet::cdf53().with_boundary(Boundary::Periodic),
            realization: Realization::Integer,
            all_zero: false,
            has_outliers: true,
            num_levels: 3,
            temporal_levels: 2,
            dims: Dims::volume(4, 32, 48),
            mean: -12.625,
            max_coefficient_bits: 9,
            min_bitplane: Some(-2),
        }
    }

    #[test]
    fn test_round_trip() {
        let mut bytes = Vec::new();
        sample().write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Header::LEN);
        assert_eq!(&bytes[..4], b"SPKW");
        let back = Header::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(back, sample());

        let unbounded = Header {
            min_bitplane: None,
            ..sample()
        };
        let mut bytes = Vec::new();
        unbounded.write(&mut bytes).unwrap();
        assert_eq!(Header::read(&mut Cursor::new(&bytes)).unwrap().min_bitplane, None);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Vec::new();
        sample().write(&mut bytes).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            Header::read(&mut Cursor::new(&bytes)),
            Err(HeaderError::BadMagic(m)) if &m == b"XPKW"
        ));
    }

    #[test]
    fn test_rejects_bad_fields() {
        let mut bytes = Vec::new();
        sample().write(&mut bytes).unwrap();

        let mut version = bytes.clone();
        version[4] = 7;
        assert!(matches!(
            Header::read(&mut Cursor::new(&version)),
            Err(HeaderError::UnsupportedVersion { major: 7, .. })
        ));

        let mut family = bytes.clone();
        family[7] = 42;
        assert!(matches!(
            Header::read(&mut Cursor::new(&family)),
            Err(HeaderError::InvalidField { field: "wavelet", value: 42 })
        ));

        assert!(matches!(
            Header::read(&mut Cursor::new(&bytes[..20])),
            Err(HeaderError::Io(_))
        ));

        let mut flags = bytes.clone();
        flags[10] = 0x80;
        assert!(matches!(
            Header::read(&mut Cursor::new(&flags)),
            Err(HeaderError::InvalidField { field: "flags", .. })
        ));
    }

    #[test]
    fn test_rejects_unallocatable_dims() {
        let mut bytes = Vec::new();
        sample().write(&mut bytes).unwrap();
        // frames at 13, rows at 17, cols at 21
        bytes[17..21].copy_from_slice(&u32::MAX.to_be_bytes());
        bytes[21..25].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            Header::read(&mut Cursor::new(&bytes)),
            Err(HeaderError::InvalidField { field: "dims", .. })
        ));

        let mut zero = bytes.clone();
        zero[13..17].copy_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            Header::read(&mut Cursor::new(&zero)),
            Err(HeaderError::InvalidField { field: "dims", value: 0 })
        ));
    }
}
