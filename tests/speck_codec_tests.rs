use image::{GrayImage, Luma};
use speck_wavelet::encode::HeaderError;
use speck_wavelet::utils::raw::samples_from_bytes;
use speck_wavelet::{
    CodecError, DecodeParams, Dims, EncoderParams, Header, Precision, Quality, SampleArray, SpeckDecoder,
    SpeckEncoder,
};
use std::fs::File;
use std::io::Write;

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Smooth gradient with a little texture, as a grayscale image.
fn gradient_image(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let ripple = ((x * 7 + y * 13) % 11) as u32;
        Luma([((x * 3 + y * 2 + ripple) % 256) as u8])
    })
}

fn samples_of(img: &GrayImage) -> SampleArray<f64> {
    let (width, height) = img.dimensions();
    let data = img.pixels().map(|p| p.0[0] as f64).collect();
    SampleArray::from_vec(Dims::plane(height as usize, width as usize), data).unwrap()
}

fn rmse(a: &SampleArray<f64>, b: &SampleArray<f64>) -> f64 {
    let sum: f64 = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    (sum / a.len() as f64).sqrt()
}

#[test]
fn test_all_zero_image_is_header_only() {
    init_logging();
    let flat = SampleArray::from_vec(Dims::plane(8, 8), vec![3.25; 64]).unwrap();
    let encoder = SpeckEncoder::new(EncoderParams {
        num_levels: 2,
        ..Default::default()
    })
    .unwrap();
    let encoded = encoder.encode_image(&flat).unwrap();
    assert_eq!(encoded.data.len(), Header::LEN);
    assert!(encoded.bitplanes.is_empty());

    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert!(decoded.header.all_zero);
    assert_eq!(decoded.samples, flat);
}

#[test]
fn test_half_budget_has_higher_error() {
    init_logging();
    let image = samples_of(&gradient_image(64, 64));
    let full_params = EncoderParams {
        num_levels: 4,
        min_bitplane: Some(-4),
        ..Default::default()
    };
    let full = SpeckEncoder::new(full_params).unwrap().encode_image(&image).unwrap();
    assert!(!full.truncated);

    let half = SpeckEncoder::new(EncoderParams {
        target_bits: Some(full.bit_count / 2),
        ..full_params
    })
    .unwrap()
    .encode_image(&image)
    .unwrap();
    assert!(half.truncated);
    assert!(half.bit_count <= full.bit_count / 2);

    let decoder = SpeckDecoder::default();
    let full_error = rmse(&decoder.decode(&full.data).unwrap().samples, &image);
    let half_error = rmse(&decoder.decode(&half.data).unwrap().samples, &image);
    println!("rmse at 100%: {:.4}, at 50%: {:.4}", full_error, half_error);
    assert!(half_error >= full_error);
}

#[test]
fn test_every_byte_prefix_refines() {
    init_logging();
    let image = samples_of(&gradient_image(32, 24));
    let encoded = SpeckEncoder::new(EncoderParams {
        num_levels: 3,
        min_bitplane: Some(-2),
        ..Default::default()
    })
    .unwrap()
    .encode_image(&image)
    .unwrap();

    let mut previous = f64::INFINITY;
    let mut planes_seen = 0;
    for bytes in Header::LEN + 1..=encoded.data.len() {
        let decoder = SpeckDecoder::new(DecodeParams {
            max_bits: Some(bytes as u64 * 8),
            ..Default::default()
        });
        let decoded = decoder.decode(&encoded.data).unwrap();
        assert!(
            encoded.bitplanes.starts_with(&decoded.bitplanes),
            "{} bytes decoded planes {:?}",
            bytes,
            decoded.bitplanes
        );
        assert!(decoded.bitplanes.len() >= planes_seen);
        planes_seen = decoded.bitplanes.len();

        let error = rmse(&decoded.samples, &image);
        assert!(error <= previous * 1.05 + 1e-9, "{} bytes: {} after {}", bytes, error, previous);
        previous = error;
    }
    assert_eq!(planes_seen, encoded.bitplanes.len());
}

#[test]
fn test_thresholds_strictly_decrease() {
    let image = samples_of(&gradient_image(32, 32));
    let encoded = SpeckEncoder::new(EncoderParams {
        num_levels: 3,
        min_bitplane: Some(-2),
        ..Default::default()
    })
    .unwrap()
    .encode_image(&image)
    .unwrap();
    assert!(encoded.bitplanes.len() > 2);
    assert!(encoded.bitplanes.windows(2).all(|w| w[1] == w[0] - 1));
    assert_eq!(*encoded.bitplanes.last().unwrap(), -2);
}

#[test]
fn test_signs_survive_first_plane() {
    // zero mean, no transform: coefficients are the samples themselves
    let values = [100.0, -100.0, 1.0, -1.0, -90.0, 70.0, -70.0, 90.0, 5.0, -5.0, 80.0, -80.0];
    let image = SampleArray::from_vec(Dims::plane(3, 4), values.to_vec()).unwrap();
    let encoded = SpeckEncoder::new(EncoderParams {
        num_levels: 0,
        ..Default::default()
    })
    .unwrap()
    .encode_image(&image)
    .unwrap();

    let decoder = SpeckDecoder::new(DecodeParams {
        max_bitplanes: Some(1),
        ..Default::default()
    });
    let decoded = decoder.decode(&encoded.data).unwrap();
    assert_eq!(decoded.bitplanes, vec![6]);
    for (d, v) in decoded.samples.as_slice().iter().zip(values) {
        if v.abs() >= 64.0 {
            assert_eq!(*d, 96.0 * v.signum());
        } else {
            assert_eq!(*d, 0.0);
        }
    }
}

#[test]
fn test_lossless_grayscale() {
    init_logging();
    let image = samples_of(&gradient_image(37, 29));
    let encoded = SpeckEncoder::new(EncoderParams::lossless(4))
        .unwrap()
        .encode_image(&image)
        .unwrap();
    assert!(!encoded.truncated);
    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.samples, image);
}

#[test]
fn test_bpp_budget_is_respected() {
    let image = samples_of(&gradient_image(32, 32));
    let encoded = SpeckEncoder::new(EncoderParams {
        quality: Some(Quality::Bpp(1.0)),
        ..Default::default()
    })
    .unwrap()
    .encode_image(&image)
    .unwrap();
    assert!(encoded.truncated);
    assert!(encoded.bit_count <= 32 * 32);
    assert!(SpeckDecoder::default().decode(&encoded.data).is_ok());
}

/// Deterministic uniform noise in `[-amplitude, amplitude)`.
fn noise(rows: usize, cols: usize, amplitude: f64) -> SampleArray<f64> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let data = (0..rows * cols)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) * amplitude
        })
        .collect();
    SampleArray::from_vec(Dims::plane(rows, cols), data).unwrap()
}

fn max_abs_error(a: &SampleArray<f64>, b: &SampleArray<f64>) -> f64 {
    a.as_slice().iter().zip(b.as_slice()).fold(0.0, |m, (x, y)| m.max((x - y).abs()))
}

#[test]
fn test_pwe_bounds_point_error() {
    init_logging();
    for image in [samples_of(&gradient_image(24, 24)), noise(32, 32, 10.0)] {
        let encoded = SpeckEncoder::new(EncoderParams {
            num_levels: 3,
            quality: Some(Quality::Pwe(0.5)),
            ..Default::default()
        })
        .unwrap()
        .encode_image(&image)
        .unwrap();
        let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
        assert_eq!(decoded.header.min_bitplane, Some(-1));
        assert!(decoded.header.has_outliers);
        let error = max_abs_error(&decoded.samples, &image);
        assert!(error <= 0.5, "max error {}", error);
    }
}

#[test]
fn test_pwe_bounds_integer_lifting() {
    let image = noise(20, 28, 50.0).map(|v| v.round());
    let encoded = SpeckEncoder::new(EncoderParams {
        quality: Some(Quality::Pwe(2.0)),
        min_bitplane: None,
        ..EncoderParams::lossless(2)
    })
    .unwrap()
    .encode_image(&image)
    .unwrap();
    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert!(max_abs_error(&decoded.samples, &image) <= 2.0);
}

#[test]
fn test_stream_through_file() {
    let image = samples_of(&gradient_image(16, 20));
    let encoded = SpeckEncoder::new(EncoderParams::default())
        .unwrap()
        .encode_image(&image)
        .unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&encoded.data).unwrap();
    file.flush().unwrap();

    let mut reader = File::open(file.path()).unwrap();
    let decoded = SpeckDecoder::default().decode_from(&mut reader).unwrap();
    let direct = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.samples, direct.samples);
    assert_eq!(decoded.samples.dims(), Dims::plane(20, 16));
}

#[test]
fn test_raw_float_samples() {
    let values: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin() * 10.0).collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let samples = samples_from_bytes(&bytes, Precision::Single, Dims::plane(8, 8)).unwrap();

    let encoded = SpeckEncoder::new(EncoderParams {
        num_levels: 2,
        min_bitplane: Some(-10),
        ..Default::default()
    })
    .unwrap()
    .encode_image(&samples)
    .unwrap();
    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert!(rmse(&decoded.samples, &samples) < 1e-2);
}

#[test]
fn test_rejects_bad_magic() {
    let image = samples_of(&gradient_image(8, 8));
    let mut data = SpeckEncoder::new(EncoderParams::default())
        .unwrap()
        .encode_image(&image)
        .unwrap()
        .data;
    data[0] = b'J';
    let result = SpeckDecoder::default().decode(&data);
    assert!(matches!(result, Err(CodecError::Header(HeaderError::BadMagic(_)))));
}

#[test]
fn test_rejects_bad_configuration() {
    assert!(matches!(
        SpeckEncoder::new(EncoderParams {
            num_levels: 256,
            ..Default::default()
        }),
        Err(CodecError::Config(_))
    ));
    assert!(matches!(
        SpeckEncoder::new(EncoderParams {
            quality: Some(Quality::Psnr(0.0)),
            ..Default::default()
        }),
        Err(CodecError::Config(_))
    ));
    assert!(matches!(
        SampleArray::<f64>::zeros(Dims::plane(0, 4)),
        Err(CodecError::Config(_))
    ));
    assert!(matches!(
        SampleArray::from_vec(Dims::plane(2, 2), vec![1.0; 3]),
        Err(CodecError::Config(_))
    ));
}
