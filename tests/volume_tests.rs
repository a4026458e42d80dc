use speck_wavelet::{
    ChunkedDecoder, ChunkedEncoder, DecodeParams, Decomposition3d, Dims, EncoderParams, Quality, SampleArray,
    SpeckDecoder, SpeckEncoder, StreamKind, Volume3dParams,
};

/// Smooth field with a per-frame drift and an integer-valued texture.
fn field(frames: usize, rows: usize, cols: usize) -> SampleArray<f64> {
    let mut volume = SampleArray::zeros(Dims::volume(frames, rows, cols)).unwrap();
    for f in 0..frames {
        for r in 0..rows {
            for c in 0..cols {
                let value = (f * 5 + r * 3 + c * 2) as f64 + ((r * 7 + c * 11 + f * 13) % 9) as f64;
                volume.set(f, r, c, value);
            }
        }
    }
    volume
}

fn max_error(a: &SampleArray<f64>, b: &SampleArray<f64>) -> f64 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .fold(0.0, |m, (x, y)| f64::max(m, (x - y).abs()))
}

#[test]
fn test_dyadic_volume_lossless() {
    let volume = field(6, 10, 12);
    let encoded = SpeckEncoder::new(EncoderParams::lossless(2))
        .unwrap()
        .encode_volume(&volume, &Volume3dParams::default())
        .unwrap();
    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.header.kind, StreamKind::VolumeDyadic);
    assert_eq!(decoded.samples, volume);
}

#[test]
fn test_packet_volume_lossless() {
    let volume = field(8, 9, 7);
    let params = Volume3dParams {
        mode: Decomposition3d::Packet,
        temporal_levels: 2,
    };
    let encoded = SpeckEncoder::new(EncoderParams::lossless(3))
        .unwrap()
        .encode_volume(&volume, &params)
        .unwrap();
    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.header.kind, StreamKind::VolumePacket);
    assert_eq!(decoded.header.temporal_levels, 2);
    assert_eq!(decoded.samples, volume);
}

#[test]
fn test_float_volume_error_tracks_floor() {
    let volume = field(4, 16, 16);
    let encoder = SpeckEncoder::new(EncoderParams {
        num_levels: 2,
        min_bitplane: Some(-9),
        ..Default::default()
    })
    .unwrap();
    for mode in [Decomposition3d::Dyadic, Decomposition3d::Packet] {
        let params = Volume3dParams {
            mode,
            temporal_levels: 1,
        };
        let encoded = encoder.encode_volume(&volume, &params).unwrap();
        assert!(!encoded.truncated);
        let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
        let error = max_error(&decoded.samples, &volume);
        assert!(error < 0.1, "{:?}: max error {}", mode, error);
    }
}

#[test]
fn test_volume_levels_are_clamped() {
    let volume = field(2, 8, 8);
    let encoded = SpeckEncoder::new(EncoderParams {
        num_levels: 6,
        min_bitplane: Some(-4),
        ..Default::default()
    })
    .unwrap()
    .encode_volume(&volume, &Volume3dParams::default())
    .unwrap();
    let decoded = SpeckDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.header.num_levels, 1);
    assert!(max_error(&decoded.samples, &volume) < 0.5);
}

#[test]
fn test_truncated_volume_still_decodes() {
    let volume = field(4, 12, 12);
    let encoded = SpeckEncoder::new(EncoderParams {
        num_levels: 2,
        min_bitplane: Some(-4),
        ..Default::default()
    })
    .unwrap()
    .encode_volume(&volume, &Volume3dParams::default())
    .unwrap();

    let decoder = SpeckDecoder::new(DecodeParams {
        max_bits: Some(encoded.bit_count / 3),
        ..Default::default()
    });
    let partial = decoder.decode(&encoded.data).unwrap();
    assert!(partial.truncated);
    assert!(partial.bitplanes.len() < encoded.bitplanes.len());
    assert_eq!(partial.samples.dims(), volume.dims());
}

#[test]
fn test_chunked_volume_matches_tolerance_across_chunk_edges() {
    let volume = field(7, 13, 18);
    let params = EncoderParams {
        num_levels: 2,
        quality: Some(Quality::Pwe(0.25)),
        ..Default::default()
    };
    let encoder = ChunkedEncoder::new(params, Dims::volume(4, 6, 6), Volume3dParams::default()).unwrap();
    let encoded = encoder.encode(&volume).unwrap();
    assert_eq!(encoded.chunks.len(), 2 * 2 * 3);

    let decoded = ChunkedDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.samples.dims(), volume.dims());
    assert!(max_error(&decoded.samples, &volume) <= 0.25);

    // the same parameters on one chunk give a single stream of the same field
    let whole = ChunkedEncoder::new(params, Dims::volume(64, 64, 64), Volume3dParams::default())
        .unwrap()
        .encode(&volume)
        .unwrap();
    assert_eq!(whole.chunks.len(), 1);
    let decoded = ChunkedDecoder::default().decode(&whole.data).unwrap();
    assert!(max_error(&decoded.samples, &volume) <= 0.25);
}

#[test]
fn test_chunked_packet_volume_lossless() {
    let volume = field(8, 8, 8);
    let encoded = ChunkedEncoder::new(
        EncoderParams::lossless(2),
        Dims::volume(4, 4, 8),
        Volume3dParams {
            mode: Decomposition3d::Packet,
            temporal_levels: 1,
        },
    )
    .unwrap()
    .encode(&volume)
    .unwrap();
    assert_eq!(encoded.chunks.len(), 4);
    let decoded = ChunkedDecoder::default().decode(&encoded.data).unwrap();
    assert_eq!(decoded.samples, volume);
}
