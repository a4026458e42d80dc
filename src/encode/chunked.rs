// src/encode/chunked.rs

//! Large volumes coded as independent chunks.
//!
//! The volume is cut into boxes of roughly the preferred chunk size; each box
//! becomes an ordinary stream and the streams are concatenated behind a small
//! container header. With the `rayon` feature chunks are encoded and decoded
//! in parallel; the output is byte-identical either way.
//!
//! Container layout, big-endian:
//!
//! | bytes | field |
//! |-------|-------|
//! | 4     | magic `SPKC` |
//! | 2     | version major, minor |
//! | 12    | volume frames, rows, cols (`u32`) |
//! | 12    | chunk frames, rows, cols (`u32`) |
//! | 4     | chunk count |
//! | 4 × n | byte length of every chunk stream |
//! | ...   | chunk streams in frame, row, col order |

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};

use super::encoder::{DecodeParams, Encoded, EncoderParams, SpeckDecoder, SpeckEncoder, Volume3dParams};
use super::header::{HeaderError, VERSION_MAJOR, VERSION_MINOR};
use crate::utils::buffer::{Dims, SampleArray};
use crate::utils::error::{CodecError, Result};

pub const CHUNKED_MAGIC: [u8; 4] = *b"SPKC";

/// Fixed part of the container, before the per-chunk lengths.
const FIXED_LEN: usize = 4 + 2 + 12 + 12 + 4;

/// One box of the volume: `origin` and `dims` in `(frame, row, col)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub origin: (usize, usize, usize),
    pub dims: Dims,
}

/// Chunk boundaries along one axis. A remainder longer than half a chunk
/// becomes its own segment; a shorter one joins the last segment.
fn axis_tics(len: usize, chunk: usize) -> Vec<usize> {
    let mut segments = len / chunk;
    if len % chunk > chunk / 2 {
        segments += 1;
    }
    let segments = segments.max(1);
    let mut tics: Vec<usize> = (0..segments).map(|i| i * chunk).collect();
    tics.push(len);
    tics
}

/// Cuts `volume` into chunks near `preferred`, frame-major like the samples.
pub fn chunk_volume(volume: Dims, preferred: Dims) -> Vec<Chunk> {
    let clamp = |chunk: usize, len: usize| chunk.clamp(1, len.max(1));
    let frames = axis_tics(volume.frames, clamp(preferred.frames, volume.frames));
    let rows = axis_tics(volume.rows, clamp(preferred.rows, volume.rows));
    let cols = axis_tics(volume.cols, clamp(preferred.cols, volume.cols));

    let mut chunks = Vec::with_capacity((frames.len() - 1) * (rows.len() - 1) * (cols.len() - 1));
    for f in frames.windows(2) {
        for r in rows.windows(2) {
            for c in cols.windows(2) {
                chunks.push(Chunk {
                    origin: (f[0], r[0], c[0]),
                    dims: Dims::volume(f[1] - f[0], r[1] - r[0], c[1] - c[0]),
                });
            }
        }
    }
    chunks
}

fn gather(volume: &SampleArray<f64>, chunk: &Chunk) -> Result<SampleArray<f64>> {
    let (f0, r0, c0) = chunk.origin;
    let Dims { frames, rows, cols } = chunk.dims;
    let source = volume.as_slice();
    let mut data = Vec::with_capacity(chunk.dims.len());
    for f in 0..frames {
        for r in 0..rows {
            let start = volume.dims().index(f0 + f, r0 + r, c0);
            data.extend_from_slice(&source[start..start + cols]);
        }
    }
    SampleArray::from_vec(chunk.dims, data)
}

fn scatter(volume: &mut SampleArray<f64>, chunk: &Chunk, samples: &SampleArray<f64>) {
    let (f0, r0, c0) = chunk.origin;
    let Dims { frames, rows, cols } = chunk.dims;
    let dims = volume.dims();
    let target = volume.as_mut_slice();
    for f in 0..frames {
        for r in 0..rows {
            let start = dims.index(f0 + f, r0 + r, c0);
            let from = chunk.dims.index(f, r, 0);
            target[start..start + cols].copy_from_slice(&samples.as_slice()[from..from + cols]);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedEncoded {
    pub data: Vec<u8>,
    /// Per-chunk results, in container order, with their bytes moved into `data`.
    pub chunks: Vec<Encoded>,
}

impl ChunkedEncoded {
    /// Some chunk ran out of budget before its floor.
    pub fn truncated(&self) -> bool {
        self.chunks.iter().any(|c| c.truncated)
    }
}

/// Encodes volumes chunk by chunk.
#[derive(Debug, Clone)]
pub struct ChunkedEncoder {
    params: EncoderParams,
    chunk_dims: Dims,
    volume_params: Volume3dParams,
}

impl ChunkedEncoder {
    pub fn new(params: EncoderParams, chunk_dims: Dims, volume_params: Volume3dParams) -> Result<Self> {
        params.validate()?;
        chunk_dims.validate()?;
        Ok(Self {
            params,
            chunk_dims,
            volume_params,
        })
    }

    /// Per-chunk parameters. A total bit budget is shared out by sample count
    /// after the container overhead.
    fn chunk_params(&self, chunk: &Chunk, total: usize, overhead_bits: u64) -> Result<EncoderParams> {
        let Some(target) = self.params.target_bits else {
            return Ok(self.params);
        };
        let available = target.saturating_sub(overhead_bits);
        let share = (chunk.dims.len() as f64 / total as f64 * available as f64).floor() as u64;
        if share == 0 {
            return Err(CodecError::config(format!(
                "a budget of {} bits leaves nothing for a {}x{}x{} chunk",
                target, chunk.dims.frames, chunk.dims.rows, chunk.dims.cols
            )));
        }
        Ok(EncoderParams {
            target_bits: Some(share),
            ..self.params
        })
    }

    fn encode_chunk(&self, volume: &SampleArray<f64>, chunk: &Chunk, params: EncoderParams) -> Result<Encoded> {
        let samples = gather(volume, chunk)?;
        let encoder = SpeckEncoder::new(params)?;
        if chunk.dims.frames == 1 {
            encoder.encode_image(&samples)
        } else {
            encoder.encode_volume(&samples, &self.volume_params)
        }
    }

    pub fn encode(&self, volume: &SampleArray<f64>) -> Result<ChunkedEncoded> {
        let dims = volume.dims();
        dims.validate()?;
        let chunks = chunk_volume(dims, self.chunk_dims);
        let overhead_bits = ((FIXED_LEN + 4 * chunks.len()) * 8) as u64;
        let jobs: Vec<(Chunk, EncoderParams)> = chunks
            .iter()
            .map(|chunk| Ok((*chunk, self.chunk_params(chunk, dims.len(), overhead_bits)?)))
            .collect::<Result<_>>()?;
        debug!("encoding {}x{}x{} as {} chunks", dims.frames, dims.rows, dims.cols, chunks.len());

        #[cfg(feature = "rayon")]
        let encoded: Vec<Encoded> = {
            use rayon::prelude::*;
            jobs.par_iter()
                .map(|(chunk, params)| self.encode_chunk(volume, chunk, *params))
                .collect::<Result<_>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let encoded: Vec<Encoded> = jobs
            .iter()
            .map(|(chunk, params)| self.encode_chunk(volume, chunk, *params))
            .collect::<Result<_>>()?;

        let total: usize = encoded.iter().map(|e| e.data.len()).sum();
        let mut data = Vec::with_capacity(FIXED_LEN + 4 * chunks.len() + total);
        data.write_all(&CHUNKED_MAGIC)?;
        data.write_u8(VERSION_MAJOR)?;
        data.write_u8(VERSION_MINOR)?;
        for extent in [dims.frames, dims.rows, dims.cols, self.chunk_dims.frames, self.chunk_dims.rows, self.chunk_dims.cols] {
            data.write_u32::<BigEndian>(to_u32("dims", extent)?)?;
        }
        data.write_u32::<BigEndian>(to_u32("chunks", chunks.len())?)?;
        for stream in &encoded {
            data.write_u32::<BigEndian>(to_u32("chunk_length", stream.data.len())?)?;
        }

        let mut results = Vec::with_capacity(encoded.len());
        for mut stream in encoded {
            data.extend_from_slice(&stream.data);
            stream.data = Vec::new();
            results.push(stream);
        }
        info!(
            "encoded {}x{}x{} in {} chunks: {} bytes{}",
            dims.frames,
            dims.rows,
            dims.cols,
            results.len(),
            data.len(),
            if results.iter().any(|c| c.truncated) { ", budget reached" } else { "" }
        );
        Ok(ChunkedEncoded { data, chunks: results })
    }
}

fn to_u32(field: &'static str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        HeaderError::InvalidField {
            field,
            value: value as i64,
        }
        .into()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedDecoded {
    pub samples: SampleArray<f64>,
    /// Some chunk stream ended before its last coded bit-plane.
    pub truncated: bool,
}

/// Decodes containers written by [`ChunkedEncoder`]. `params` apply to every
/// chunk stream on its own.
#[derive(Debug, Clone, Default)]
pub struct ChunkedDecoder {
    params: DecodeParams,
}

impl ChunkedDecoder {
    pub fn new(params: DecodeParams) -> Self {
        Self { params }
    }

    pub fn decode(&self, data: &[u8]) -> Result<ChunkedDecoded> {
        let mut cursor = Cursor::new(data);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(HeaderError::from)?;
        if magic != CHUNKED_MAGIC {
            return Err(HeaderError::BadMagic(magic).into());
        }
        let major = cursor.read_u8()?;
        let minor = cursor.read_u8()?;
        if major != VERSION_MAJOR {
            return Err(HeaderError::UnsupportedVersion { major, minor }.into());
        }

        let mut extents = [0usize; 6];
        for extent in &mut extents {
            *extent = cursor.read_u32::<BigEndian>()? as usize;
        }
        let dims = Dims::volume(extents[0], extents[1], extents[2]);
        let chunk_dims = Dims::volume(extents[3], extents[4], extents[5]);
        for candidate in [dims, chunk_dims] {
            if candidate.validate().is_err() {
                return Err(HeaderError::InvalidField {
                    field: "dims",
                    value: candidate.frames.saturating_mul(candidate.rows).saturating_mul(candidate.cols) as i64,
                }
                .into());
            }
        }

        let chunks = chunk_volume(dims, chunk_dims);
        let count = cursor.read_u32::<BigEndian>()? as usize;
        if count != chunks.len() {
            return Err(HeaderError::InvalidField {
                field: "chunks",
                value: count as i64,
            }
            .into());
        }
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            lengths.push(cursor.read_u32::<BigEndian>()? as usize);
        }

        let mut offset = cursor.position() as usize;
        let mut streams = Vec::with_capacity(count);
        for len in lengths {
            let Some(stream) = offset.checked_add(len).and_then(|end| data.get(offset..end)) else {
                return Err(HeaderError::InvalidField {
                    field: "chunk_length",
                    value: len as i64,
                }
                .into());
            };
            streams.push(stream);
            offset += len;
        }

        let decoder = SpeckDecoder::new(self.params);
        let decode_one = |(chunk, stream): (&Chunk, &&[u8])| -> Result<(SampleArray<f64>, bool)> {
            let decoded = decoder.decode(stream)?;
            if decoded.samples.dims() != chunk.dims {
                return Err(HeaderError::InvalidField {
                    field: "chunk_dims",
                    value: decoded.samples.len() as i64,
                }
                .into());
            }
            Ok((decoded.samples, decoded.truncated))
        };

        #[cfg(feature = "rayon")]
        let decoded: Vec<(SampleArray<f64>, bool)> = {
            use rayon::prelude::*;
            chunks.par_iter().zip(streams.par_iter()).map(decode_one).collect::<Result<_>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let decoded: Vec<(SampleArray<f64>, bool)> =
            chunks.iter().zip(streams.iter()).map(decode_one).collect::<Result<_>>()?;

        let mut samples = SampleArray::zeros(dims)?;
        let mut truncated = false;
        for (chunk, (part, cut)) in chunks.iter().zip(&decoded) {
            scatter(&mut samples, chunk, part);
            truncated |= cut;
        }
        info!(
            "decoded {}x{}x{} from {} chunks{}",
            dims.frames,
            dims.rows,
            dims.cols,
            chunks.len(),
            if truncated { ", some ended early" } else { "" }
        );
        Ok(ChunkedDecoded { samples, truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encoder::Quality;

    fn field(frames: usize, rows: usize, cols: usize) -> SampleArray<f64> {
        let mut volume = SampleArray::zeros(Dims::volume(frames, rows, cols)).unwrap();
        for f in 0..frames {
            for r in 0..rows {
                for c in 0..cols {
                    let value = ((f * 7 + r * 3 + c) as f64 * 0.3).sin() * 20.0 + (r * c) as f64 * 0.1;
                    volume.set(f, r, c, value);
                }
            }
        }
        volume
    }

    #[test]
    fn test_axis_tics() {
        assert_eq!(axis_tics(10, 4), vec![0, 4, 10]);
        assert_eq!(axis_tics(11, 4), vec![0, 4, 8, 11]);
        assert_eq!(axis_tics(3, 8), vec![0, 3]);
        assert_eq!(axis_tics(8, 8), vec![0, 8]);
    }

    #[test]
    fn test_chunks_tile_the_volume() {
        let volume = Dims::volume(9, 20, 13);
        let chunks = chunk_volume(volume, Dims::volume(4, 8, 8));
        assert_eq!(chunks.len(), 2 * 2 * 2);
        assert_eq!(chunks.iter().map(|c| c.dims.len()).sum::<usize>(), volume.len());
        assert_eq!(chunks[0].origin, (0, 0, 0));
        assert_eq!(chunks[0].dims, Dims::volume(4, 8, 8));
        let last = chunks.last().unwrap();
        assert_eq!(last.origin, (4, 8, 8));
        assert_eq!(last.dims, Dims::volume(5, 12, 5));

        let whole = chunk_volume(volume, Dims::volume(64, 64, 64));
        assert_eq!(whole, vec![Chunk {
            origin: (0, 0, 0),
            dims: volume
        }]);
    }

    #[test]
    fn test_gather_scatter() {
        let volume = field(3, 5, 7);
        let chunk = Chunk {
            origin: (1, 2, 3),
            dims: Dims::volume(2, 3, 4),
        };
        let part = gather(&volume, &chunk).unwrap();
        assert_eq!(part.get(1, 2, 3), volume.get(2, 4, 6));

        let mut copy = SampleArray::zeros(volume.dims()).unwrap();
        scatter(&mut copy, &chunk, &part);
        assert_eq!(copy.get(2, 4, 6), volume.get(2, 4, 6));
        assert_eq!(copy.get(0, 0, 0), 0.0);
    }

    #[test]
    fn test_lossless_chunked_round_trip() {
        let volume = field(6, 12, 10).map(|v| v.round());
        let encoder = ChunkedEncoder::new(EncoderParams::lossless(2), Dims::volume(3, 6, 8), Volume3dParams::default())
            .unwrap();
        let encoded = encoder.encode(&volume).unwrap();
        assert_eq!(&encoded.data[..4], b"SPKC");
        assert_eq!(encoded.chunks.len(), 2 * 2 * 1);
        assert!(!encoded.truncated());

        let decoded = ChunkedDecoder::default().decode(&encoded.data).unwrap();
        assert!(!decoded.truncated);
        assert_eq!(decoded.samples, volume);
    }

    #[test]
    fn test_chunked_point_error_bound() {
        let volume = field(5, 9, 9);
        let params = EncoderParams {
            num_levels: 2,
            quality: Some(Quality::Pwe(0.05)),
            ..Default::default()
        };
        let encoded = ChunkedEncoder::new(params, Dims::volume(3, 4, 4), Volume3dParams::default())
            .unwrap()
            .encode(&volume)
            .unwrap();
        let decoded = ChunkedDecoder::default().decode(&encoded.data).unwrap();
        for (d, v) in decoded.samples.as_slice().iter().zip(volume.as_slice()) {
            assert!((d - v).abs() <= 0.05, "{} vs {}", d, v);
        }
    }

    #[test]
    fn test_budget_is_shared_between_chunks() {
        let volume = field(4, 16, 16);
        let target = 6000;
        let encoded = ChunkedEncoder::new(
            EncoderParams {
                num_levels: 2,
                target_bits: Some(target),
                ..Default::default()
            },
            Dims::volume(4, 8, 8),
            Volume3dParams::default(),
        )
        .unwrap()
        .encode(&volume)
        .unwrap();
        assert!(encoded.truncated());
        assert!(encoded.data.len() as u64 * 8 <= target + 8 * encoded.chunks.len() as u64);
        assert!(ChunkedDecoder::default().decode(&encoded.data).is_ok());
    }

    #[test]
    fn test_rejects_damaged_containers() {
        let volume = field(2, 8, 8);
        let encoded = ChunkedEncoder::new(EncoderParams::default(), Dims::volume(2, 4, 8), Volume3dParams::default())
            .unwrap()
            .encode(&volume)
            .unwrap();

        let mut magic = encoded.data.clone();
        magic[3] = b'W';
        assert!(matches!(
            ChunkedDecoder::default().decode(&magic),
            Err(CodecError::Header(HeaderError::BadMagic(_)))
        ));

        let mut count = encoded.data.clone();
        count[30..34].copy_from_slice(&7u32.to_be_bytes());
        assert!(matches!(
            ChunkedDecoder::default().decode(&count),
            Err(CodecError::Header(HeaderError::InvalidField { field: "chunks", .. }))
        ));

        let cut = &encoded.data[..encoded.data.len() - 3];
        assert!(matches!(
            ChunkedDecoder::default().decode(cut),
            Err(CodecError::Header(HeaderError::InvalidField { field: "chunk_length", .. }))
        ));
    }
}
