//! Upload pipeline behaviour with the mock backend

use bgremove_server::{
    BackgroundRemovalProcessor, ImageIOService, MockBackend, MockOutput, ModelProfile, ModelSpec,
    RemovalConfig, RemovalOutcome, RemovalPipeline,
};
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgb, Rgba};
use std::io::Cursor;
use std::sync::Arc;

fn pipeline(output: MockOutput) -> RemovalPipeline {
    let config = RemovalConfig::builder()
        .model_spec(ModelSpec::cached(ModelProfile::U2netp))
        .build()
        .unwrap();
    let backend = Box::new(MockBackend::with_output(ModelProfile::U2netp, output));
    let processor = BackgroundRemovalProcessor::with_backend(config, backend).unwrap();
    RemovalPipeline::new(Arc::new(processor))
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// JPEG with an EXIF APP1 segment carrying `orientation`
fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let jpeg = encode(width, height, ImageFormat::Jpeg);
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"MM\x00\x2A\x00\x00\x00\x08");
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x0112u16.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&orientation.to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes());

    let mut payload = b"Exif\x00\x00".to_vec();
    payload.extend_from_slice(&tiff);
    let segment_len = u16::try_from(payload.len() + 2).unwrap();

    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[test]
fn test_valid_upload_yields_decodable_png() {
    for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Bmp] {
        let result = pipeline(MockOutput::CenteredBlob)
            .process_upload(&encode(48, 32, format))
            .unwrap();
        assert!(!result.png.is_empty());
        let decoded = image::load_from_memory_with_format(&result.png, ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (48, 32), "{format:?}");
    }
}

#[test]
fn test_longest_side_bounded_to_3000() {
    let result = pipeline(MockOutput::Constant(0.0))
        .process_upload(&encode(3200, 400, ImageFormat::Png))
        .unwrap();
    assert_eq!(result.dimensions, (3000, 375));

    let decoded = image::load_from_memory(&result.png).unwrap();
    assert_eq!(decoded.dimensions(), (3000, 375));
}

#[test]
fn test_dimension_at_limit_untouched() {
    let result = pipeline(MockOutput::Constant(0.0))
        .process_upload(&encode(3000, 8, ImageFormat::Png))
        .unwrap();
    assert_eq!(result.dimensions, (3000, 8));
}

#[test]
fn test_exif_orientation_6_swaps_dimensions() {
    let bytes = jpeg_with_orientation(40, 20, 6);

    let normalized = ImageIOService::normalize_upload(&bytes, 3000).unwrap();
    assert_eq!(normalized.dimensions(), (20, 40));

    let result = pipeline(MockOutput::CenteredBlob).process_upload(&bytes).unwrap();
    assert_eq!(result.dimensions, (20, 40));
}

#[test]
fn test_constant_mask_falls_back_with_alpha() {
    let bytes = encode(60, 30, ImageFormat::Jpeg);
    let result = pipeline(MockOutput::Constant(0.7)).process_upload(&bytes).unwrap();

    assert_eq!(result.outcome, RemovalOutcome::Fallback);
    let normalized = ImageIOService::normalize_upload(&bytes, 3000).unwrap();
    assert_eq!(result.png, ImageIOService::encode_png(&normalized.image).unwrap());

    let decoded = image::load_from_memory(&result.png).unwrap();
    assert!(decoded.color().has_alpha());
    assert!(decoded.to_rgba8().pixels().all(|p| p.0[3] == 255));
}

#[test]
fn test_pipeline_is_shareable_across_threads() {
    let pipeline = pipeline(MockOutput::CenteredBlob);
    let bytes = Arc::new(encode(32, 32, ImageFormat::Png));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            let bytes = Arc::clone(&bytes);
            std::thread::spawn(move || pipeline.process_upload(&bytes).unwrap().outcome)
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), RemovalOutcome::Removed);
    }
}

#[test]
fn test_upload_transparency_survives_cutout() {
    // left half transparent, right half opaque
    let image = DynamicImage::ImageRgba8(ImageBuffer::from_fn(40, 40, |x, _| {
        if x < 20 {
            Rgba([255, 0, 0, 0])
        } else {
            Rgba([0, 0, 255, 255])
        }
    }));
    let bytes = ImageIOService::encode_png(&image).unwrap();

    let result = pipeline(MockOutput::CenteredBlob).process_upload(&bytes).unwrap();
    assert_eq!(result.outcome, RemovalOutcome::Removed);

    let cutout = image::load_from_memory(&result.png).unwrap().to_rgba8();
    assert_eq!(cutout.get_pixel(19, 20).0[3], 0);
    assert!(cutout.get_pixel(21, 20).0[3] > 200);
}
