// src/encode/encoder.rs

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use log::{debug, info, warn};

use super::bitplane::{lowest_bitplane, run_bitplanes, BitplaneCoder, CoderIo, PassOutcome};
use super::header::{Header, HeaderError, Realization, StreamKind};
use super::outlier::{find_outliers, OutlierCoder};
use super::speck::Speck2d;
use super::speck3d::Speck3d;
use crate::entropy::{BitReader, BitWriter};
use crate::pyramid::SubbandPyramid;
use crate::transform::dwt::{self, AxisAlignment};
use crate::transform::{Boundary, FilterFamily, LiftingSample, TransformError, Wavelet};
use crate::utils::buffer::{Dims, SampleArray};
use crate::utils::error::{CodecError, Result};

/// Target quality; each variant picks the rate or the termination floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quality {
    /// Bits per sample, converted to a bit budget.
    Bpp(f64),
    /// Peak signal-to-noise ratio in dB relative to the data range.
    Psnr(f64),
    /// Point-wise error tolerance, guaranteed by an outlier correction pass.
    Pwe(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderParams {
    pub num_levels: u32,
    pub wavelet: Wavelet,
    pub realization: Realization,
    /// Total stream size in bits, header included.
    pub target_bits: Option<u64>,
    pub quality: Option<Quality>,
    /// Last bit-plane to code.
    pub min_bitplane: Option<i32>,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            num_levels: 5,
            wavelet: Wavelet::cdf97(),
            realization: Realization::Float,
            target_bits: None,
            quality: None,
            min_bitplane: None,
        }
    }
}

impl EncoderParams {
    /// Lossless setup: reversible 5/3 lifting coded down to bit-plane 0.
    pub fn lossless(num_levels: u32) -> Self {
        Self {
            num_levels,
            wavelet: Wavelet::cdf53(),
            realization: Realization::Integer,
            min_bitplane: Some(0),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_levels > u8::MAX as u32 {
            return Err(CodecError::config(format!(
                "{} decomposition levels do not fit the stream header",
                self.num_levels
            )));
        }
        if self.target_bits == Some(0) {
            return Err(CodecError::config("target_bits must be positive"));
        }
        if self.realization == Realization::Integer
            && self.wavelet.family() == FilterFamily::Cdf97
            && self.wavelet.boundary() == Boundary::BoundaryWavelet
        {
            return Err(TransformError::IntegerBoundaryWavelet.into());
        }

        let Some(quality) = self.quality else {
            return Ok(());
        };
        let (name, value) = match quality {
            Quality::Bpp(v) => ("bpp", v),
            Quality::Psnr(v) => ("psnr", v),
            Quality::Pwe(v) => ("pwe", v),
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(CodecError::config(format!("{} must be a positive number, got {}", name, value)));
        }
        match quality {
            Quality::Bpp(_) if self.target_bits.is_some() => {
                Err(CodecError::config("bpp and target_bits both set a bit budget"))
            }
            Quality::Psnr(_) | Quality::Pwe(_) if self.min_bitplane.is_some() => Err(CodecError::config(format!(
                "{} and min_bitplane both set the termination floor",
                name
            ))),
            Quality::Pwe(_) if self.target_bits.is_some() => {
                Err(CodecError::config("a bit budget cannot guarantee a point-wise error bound"))
            }
            _ => Ok(()),
        }
    }

    /// Bit budget and floor implied by the parameters for `samples`.
    fn rate_control(&self, samples: &[f64]) -> (Option<u64>, Option<i32>) {
        let mut budget = self.target_bits;
        let mut floor = self.min_bitplane;
        match self.quality {
            Some(Quality::Bpp(bpp)) => budget = Some((bpp * samples.len() as f64).ceil() as u64),
            Some(Quality::Psnr(psnr)) => {
                let (lo, hi) = samples
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                let range = hi - lo;
                if range > 0.0 {
                    let mse = range * range / 10f64.powf(psnr / 10.0);
                    floor = Some((12.0 * mse).sqrt().log2().floor() as i32);
                }
            }
            Some(Quality::Pwe(tolerance)) => floor = Some(tolerance.log2().floor() as i32),
            None => {}
        }
        if self.realization == Realization::Integer {
            floor = floor.map(|f| f.max(0));
        }
        (budget, floor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decomposition3d {
    /// Every axis decomposed the same number of times.
    #[default]
    Dyadic,
    /// Full spatial pyramid on every frame, then a temporal pyramid on every tube.
    Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume3dParams {
    pub mode: Decomposition3d,
    /// Levels along the frame axis; only used by [`Decomposition3d::Packet`].
    pub temporal_levels: u32,
}

impl Default for Volume3dParams {
    fn default() -> Self {
        Self {
            mode: Decomposition3d::Dyadic,
            temporal_levels: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeParams {
    /// Stop reading after this many stream bits, header included.
    pub max_bits: Option<u64>,
    /// Decode at most this many bit-planes.
    pub max_bitplanes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub data: Vec<u8>,
    /// Bits produced before byte padding.
    pub bit_count: u64,
    /// Bit-planes fully coded, highest first.
    pub bitplanes: Vec<i32>,
    /// The budget ran out before the floor.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub samples: SampleArray<f64>,
    pub header: Header,
    pub bitplanes: Vec<i32>,
    pub truncated: bool,
}

/// Largest level count that leaves every listed extent at least one sample.
fn max_levels(len: usize) -> u32 {
    let mut len = len;
    let mut levels = 0;
    while len > 1 {
        len -= len / 2;
        levels += 1;
    }
    levels
}

fn clamp_levels(requested: u32, extents: &[usize]) -> u32 {
    let limit = extents.iter().map(|&n| max_levels(n)).min().unwrap_or(0);
    if requested > limit {
        info!("clamping {} decomposition levels to {} for extents {:?}", requested, limit, extents);
    }
    requested.min(limit)
}

/// Sample types the codec can run its transform in.
trait Realized: LiftingSample {
    fn from_sample(value: f64) -> Self;
    fn to_coefficient(self) -> f64;
    /// `exact` means every bit-plane down to 0 was decoded.
    fn from_coefficient(value: f64, exact: bool) -> Self;
    fn to_sample(self) -> f64;
    fn remove_mean(samples: &mut SubbandPyramid<Self>) -> f64;
    fn restore_mean(samples: &mut SubbandPyramid<Self>, mean: f64);
}

impl Realized for f64 {
    fn from_sample(value: f64) -> Self {
        value
    }

    fn to_coefficient(self) -> f64 {
        self
    }

    fn from_coefficient(value: f64, _exact: bool) -> Self {
        value
    }

    fn to_sample(self) -> f64 {
        self
    }

    fn remove_mean(samples: &mut SubbandPyramid<Self>) -> f64 {
        samples.subtract_mean()
    }

    fn restore_mean(samples: &mut SubbandPyramid<Self>, mean: f64) {
        samples.add_mean(mean)
    }
}

impl Realized for i64 {
    fn from_sample(value: f64) -> Self {
        value.round() as i64
    }

    fn to_coefficient(self) -> f64 {
        self as f64
    }

    // A fully decoded magnitude sits half a step above the true integer.
    fn from_coefficient(value: f64, exact: bool) -> Self {
        if exact { value.trunc() as i64 } else { value.round() as i64 }
    }

    fn to_sample(self) -> f64 {
        self as f64
    }

    fn remove_mean(samples: &mut SubbandPyramid<Self>) -> f64 {
        samples.subtract_mean() as f64
    }

    fn restore_mean(samples: &mut SubbandPyramid<Self>, mean: f64) {
        samples.add_mean(mean.round() as i64)
    }
}

/// `(spatial, temporal)` levels recorded for a stream kind.
fn stream_levels(header: &Header) -> (u32, u32) {
    let levels = header.num_levels as u32;
    match header.kind {
        StreamKind::Image => (levels, 0),
        StreamKind::VolumeDyadic => (levels, levels),
        StreamKind::VolumePacket => (levels, header.temporal_levels as u32),
    }
}

fn forward_volume<T: Realized>(data: &mut [T], header: &Header) -> Result<()> {
    let (spatial, temporal) = stream_levels(header);
    let alignment = AxisAlignment::default();
    match header.kind {
        StreamKind::VolumePacket => {
            dwt::packet_dwt_3d(data, header.dims, spatial, temporal, &alignment, &header.wavelet)?
        }
        _ => dwt::dwt_3d(data, header.dims, spatial, &alignment, &header.wavelet)?,
    }
    Ok(())
}

fn inverse_volume<T: Realized>(data: &mut [T], header: &Header) -> Result<()> {
    let (spatial, temporal) = stream_levels(header);
    let alignment = AxisAlignment::default();
    match header.kind {
        StreamKind::VolumePacket => {
            dwt::inverse_packet_dwt_3d(data, header.dims, spatial, temporal, &alignment, &header.wavelet)?
        }
        _ => dwt::inverse_dwt_3d(data, header.dims, spatial, &alignment, &header.wavelet)?,
    }
    Ok(())
}

/// The mean is layout independent, so a volume is viewed as one tall plane.
fn flat_view<T: Realized>(dims: Dims, data: Vec<T>) -> Result<SubbandPyramid<T>> {
    SubbandPyramid::new(dims.frames * dims.rows, dims.cols, data)
}

/// Embedded encoder for images and volumes.
#[derive(Debug, Clone)]
pub struct SpeckEncoder {
    params: EncoderParams,
}

impl SpeckEncoder {
    pub fn new(params: EncoderParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &EncoderParams {
        &self.params
    }

    /// Encodes a single-frame sample array with the 2D coder.
    pub fn encode_image(&self, image: &SampleArray<f64>) -> Result<Encoded> {
        let dims = image.dims();
        dims.validate()?;
        if dims.frames != 1 {
            return Err(CodecError::config(format!(
                "expected a single frame, got {}; use encode_volume",
                dims.frames
            )));
        }
        match self.params.realization {
            Realization::Float => self.encode_image_as::<f64>(image),
            Realization::Integer => self.encode_image_as::<i64>(image),
        }
    }

    fn encode_image_as<T: Realized>(&self, image: &SampleArray<f64>) -> Result<Encoded> {
        let dims = image.dims();
        let levels = clamp_levels(self.params.num_levels, &[dims.rows, dims.cols]);
        let (budget, floor) = self.params.rate_control(image.as_slice());

        let samples: Vec<T> = image.as_slice().iter().map(|&v| T::from_sample(v)).collect();
        let mut pyramid = SubbandPyramid::new(dims.rows, dims.cols, samples)?;
        let mean = T::remove_mean(&mut pyramid);
        pyramid.dwt(levels, &self.params.wavelet)?;

        let coefficients: Vec<f64> = pyramid.coefficients().iter().map(|&c| c.to_coefficient()).collect();
        let coefficients = SubbandPyramid::from_coefficients(dims.rows, dims.cols, levels, coefficients)?;

        let header = self.header(StreamKind::Image, dims, (levels, 0), mean, floor);
        let encoded = self.encode_coefficients(header, coefficients.coefficients(), budget, || {
            Speck2d::for_encoding(&coefficients)
        })?;
        self.bound_point_errors::<T>(encoded, image.as_slice())
    }

    /// Encodes a multi-frame array with the 3D coder.
    pub fn encode_volume(&self, volume: &SampleArray<f64>, volume_params: &Volume3dParams) -> Result<Encoded> {
        volume.dims().validate()?;
        match self.params.realization {
            Realization::Float => self.encode_volume_as::<f64>(volume, volume_params),
            Realization::Integer => self.encode_volume_as::<i64>(volume, volume_params),
        }
    }

    fn encode_volume_as<T: Realized>(&self, volume: &SampleArray<f64>, volume_params: &Volume3dParams) -> Result<Encoded> {
        let dims = volume.dims();
        let (kind, levels) = match volume_params.mode {
            Decomposition3d::Dyadic => {
                let levels = clamp_levels(self.params.num_levels, &[dims.frames, dims.rows, dims.cols]);
                (StreamKind::VolumeDyadic, (levels, levels))
            }
            Decomposition3d::Packet => {
                if volume_params.temporal_levels > u8::MAX as u32 {
                    return Err(CodecError::config(format!(
                        "{} temporal levels do not fit the stream header",
                        volume_params.temporal_levels
                    )));
                }
                (
                    StreamKind::VolumePacket,
                    (
                        clamp_levels(self.params.num_levels, &[dims.rows, dims.cols]),
                        clamp_levels(volume_params.temporal_levels, &[dims.frames]),
                    ),
                )
            }
        };
        let (budget, floor) = self.params.rate_control(volume.as_slice());

        let samples: Vec<T> = volume.as_slice().iter().map(|&v| T::from_sample(v)).collect();
        let mut flat = flat_view(dims, samples)?;
        let mean = T::remove_mean(&mut flat);
        let mut data = flat.into_coefficients();

        let header = self.header(kind, dims, levels, mean, floor);
        forward_volume(&mut data, &header)?;

        let coefficients: Vec<f64> = data.iter().map(|&c| c.to_coefficient()).collect();
        let encoded = self.encode_coefficients(header, &coefficients, budget, || {
            Speck3d::for_encoding(dims, &coefficients, levels)
        })?;
        self.bound_point_errors::<T>(encoded, volume.as_slice())
    }

    /// Under [`Quality::Pwe`], decodes the stream just produced and appends
    /// corrections for every sample still beyond the tolerance, followed by the
    /// section length as a big-endian `u32`.
    fn bound_point_errors<T: Realized>(&self, mut encoded: Encoded, samples: &[f64]) -> Result<Encoded> {
        let Some(Quality::Pwe(tolerance)) = self.params.quality else {
            return Ok(encoded);
        };
        let mut input = BitReader::new(&encoded.data);
        let header = Header::read(&mut input)?;
        let reconstructed = SpeckDecoder::default().decode_as::<T>(header, input)?;
        let outliers = find_outliers(samples, reconstructed.samples.as_slice(), tolerance);

        let section = OutlierCoder::new(tolerance).encode(samples.len(), &outliers)?;
        let section_len = u32::try_from(section.len())
            .map_err(|_| CodecError::config(format!("outlier section of {} bytes is too large", section.len())))?;
        encoded.data.extend_from_slice(&section);
        encoded.data.write_u32::<BigEndian>(section_len)?;
        encoded.bit_count = encoded.data.len() as u64 * 8;
        info!(
            "{} of {} samples beyond tolerance {}; corrections take {} bytes",
            outliers.len(),
            samples.len(),
            tolerance,
            section.len()
        );
        Ok(encoded)
    }

    fn header(&self, kind: StreamKind, dims: Dims, levels: (u32, u32), mean: f64, floor: Option<i32>) -> Header {
        Header {
            kind,
            wavelet: self.params.wavelet,
            realization: self.params.realization,
            all_zero: false,
            has_outliers: matches!(self.params.quality, Some(Quality::Pwe(_))),
            num_levels: levels.0 as u8,
            temporal_levels: if kind == StreamKind::VolumePacket { levels.1 as u8 } else { 0 },
            dims,
            mean,
            max_coefficient_bits: 0,
            min_bitplane: floor,
        }
    }

    fn encode_coefficients<C: BitplaneCoder>(
        &self,
        mut header: Header,
        coefficients: &[f64],
        budget: Option<u64>,
        coder: impl FnOnce() -> C,
    ) -> Result<Encoded> {
        let max = coefficients.iter().fold(0.0f64, |m, c| m.max(c.abs()));
        let mut out = BitWriter::new();

        if max == 0.0 {
            header.all_zero = true;
            header.write(&mut out)?;
            info!(
                "encoded {}x{}x{} all-zero data as a bare header",
                header.dims.frames, header.dims.rows, header.dims.cols
            );
            return Ok(Encoded {
                bit_count: out.bit_count(),
                data: out.into_bytes(),
                bitplanes: Vec::new(),
                truncated: false,
            });
        }

        let top = max.log2().floor() as i32;
        header.max_coefficient_bits = top;
        header.write(&mut out)?;
        if let Some(budget) = budget {
            if budget <= out.bit_count() {
                warn!("bit budget {} does not exceed the {}-bit header", budget, out.bit_count());
            }
        }

        let lowest = lowest_bitplane(top, header.min_bitplane, header.realization == Realization::Integer);
        debug!("coding bit-planes {} down to {}", top, lowest);

        let mut io = CoderIo::encoder(out, budget);
        let mut coder = coder();
        let outcome = run_bitplanes(&mut coder, &mut io, top, lowest)?;
        let out = io.into_output().unwrap_or_default();

        let bit_count = out.bit_count();
        info!(
            "encoded {}x{}x{} ({:?}, {} levels, {}): {} bits, {} bit-planes{}",
            header.dims.frames,
            header.dims.rows,
            header.dims.cols,
            header.kind,
            header.num_levels,
            header.wavelet,
            bit_count,
            outcome.planes.len(),
            if outcome.truncated { ", budget reached" } else { "" }
        );
        Ok(Encoded {
            data: out.into_bytes(),
            bit_count,
            bitplanes: outcome.planes,
            truncated: outcome.truncated,
        })
    }
}

/// Splits `data` into the wavelet stream and the outlier section before the
/// trailing length.
fn split_outlier_section(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let trailer = data.len().checked_sub(4).filter(|&at| at >= Header::LEN);
    let Some(trailer) = trailer else {
        return Err(HeaderError::InvalidField {
            field: "outlier_length",
            value: data.len() as i64,
        }
        .into());
    };
    let section_len = BigEndian::read_u32(&data[trailer..]) as usize;
    let Some(start) = trailer.checked_sub(section_len).filter(|&at| at >= Header::LEN) else {
        return Err(HeaderError::InvalidField {
            field: "outlier_length",
            value: section_len as i64,
        }
        .into());
    };
    Ok((&data[..start], &data[start..trailer]))
}

/// Decoder for streams produced by [`SpeckEncoder`].
#[derive(Debug, Clone, Default)]
pub struct SpeckDecoder {
    params: DecodeParams,
}

impl SpeckDecoder {
    pub fn new(params: DecodeParams) -> Self {
        Self { params }
    }

    pub fn decode_from<R: Read>(&self, reader: &mut R) -> Result<Decoded> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.decode(&data)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Decoded> {
        let mut input = BitReader::new(data);
        let header = Header::read(&mut input)?;
        if header.kind == StreamKind::Image && header.dims.frames != 1 {
            return Err(HeaderError::InvalidField {
                field: "frames",
                value: header.dims.frames as i64,
            }
            .into());
        }
        if !header.has_outliers {
            return self.decode_body(header, input);
        }

        let (main, section) = split_outlier_section(data)?;
        let mut input = BitReader::new(main);
        Header::read(&mut input)?;
        let mut decoded = self.decode_body(header, input)?;

        let whole_stream = self.params.max_bits.is_none_or(|bits| bits >= data.len() as u64 * 8);
        if !whole_stream || !self.fully_decoded(&decoded) {
            debug!("stream decoded partially; outlier corrections skipped");
            return Ok(decoded);
        }
        let (coder, corrections) = OutlierCoder::decode(section, decoded.samples.len())?;
        let samples = decoded.samples.as_mut_slice();
        for &(index, correction) in &corrections {
            samples[index] += correction;
        }
        debug!("applied {} corrections at tolerance {}", corrections.len(), coder.tolerance());
        Ok(decoded)
    }

    fn decode_body(&self, header: Header, input: BitReader<'_>) -> Result<Decoded> {
        match header.realization {
            Realization::Float => self.decode_as::<f64>(header, input),
            Realization::Integer => self.decode_as::<i64>(header, input),
        }
    }

    /// Every bit-plane the encoder coded was decoded.
    fn fully_decoded(&self, decoded: &Decoded) -> bool {
        let header = &decoded.header;
        if header.all_zero {
            return true;
        }
        let integer = header.realization == Realization::Integer;
        let lowest = lowest_bitplane(header.max_coefficient_bits, header.min_bitplane, integer);
        !decoded.truncated && decoded.bitplanes.last() == Some(&lowest)
    }

    fn decode_as<T: Realized>(&self, header: Header, input: BitReader<'_>) -> Result<Decoded> {
        let dims = header.dims;
        let (coefficients, outcome) = if header.all_zero {
            (vec![0.0; dims.len()], PassOutcome::default())
        } else {
            self.decode_coefficients(&header, input)?
        };

        let integer = header.realization == Realization::Integer;
        let exact = integer && outcome.reached(0);
        let values: Vec<T> = coefficients.iter().map(|&c| T::from_coefficient(c, exact)).collect();

        let mut samples = match header.kind {
            StreamKind::Image => {
                let mut pyramid = SubbandPyramid::from_coefficients(dims.rows, dims.cols, header.num_levels as u32, values)?;
                pyramid.inverse_dwt(&header.wavelet)?;
                pyramid
            }
            _ => {
                let mut data = values;
                inverse_volume(&mut data, &header)?;
                flat_view(dims, data)?
            }
        };
        T::restore_mean(&mut samples, header.mean);

        let data = samples.coefficients().iter().map(|&v| v.to_sample()).collect();
        info!(
            "decoded {}x{}x{} ({:?}): {} bit-planes{}",
            dims.frames,
            dims.rows,
            dims.cols,
            header.kind,
            outcome.planes.len(),
            if outcome.truncated { ", stream ended early" } else { "" }
        );
        Ok(Decoded {
            samples: SampleArray::from_vec(dims, data)?,
            header,
            bitplanes: outcome.planes,
            truncated: outcome.truncated,
        })
    }

    fn decode_coefficients(&self, header: &Header, input: BitReader<'_>) -> Result<(Vec<f64>, PassOutcome)> {
        let dims = header.dims;
        let top = header.max_coefficient_bits;
        let mut lowest = lowest_bitplane(top, header.min_bitplane, header.realization == Realization::Integer);
        if let Some(max) = self.params.max_bitplanes {
            lowest = lowest.max(top.saturating_sub(max as i32).saturating_add(1));
        }

        let mut io = match CoderIo::decoder(input, self.params.max_bits) {
            Ok(io) => io,
            Err(e) if e.is_end_of_stream() => {
                debug!("no coded bits after the header: {}", e);
                let outcome = PassOutcome {
                    planes: Vec::new(),
                    truncated: true,
                };
                return Ok((vec![0.0; dims.len()], outcome));
            }
            Err(e) => return Err(e.into()),
        };

        let levels = stream_levels(header);
        match header.kind {
            StreamKind::Image => {
                let geometry = SubbandPyramid::from_coefficients(dims.rows, dims.cols, levels.0, vec![0.0; dims.len()])?;
                let mut coder = Speck2d::for_decoding(geometry);
                let outcome = run_bitplanes(&mut coder, &mut io, top, lowest)?;
                Ok((coder.into_coefficients().into_coefficients(), outcome))
            }
            _ => {
                let mut coder = Speck3d::for_decoding(dims, levels);
                let outcome = run_bitplanes(&mut coder, &mut io, top, lowest)?;
                Ok((coder.into_coefficients(), outcome))
            }
        }
    }
}
