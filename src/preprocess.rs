use image::{imageops::FilterType, ImageBuffer, ImageFormat, Rgb};
use ndarray::Array3;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::tensor::{PixelTensor, Size, TensorLedger};

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Failed to read asset {path:?}: {source}")]
    AssetRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Asset is not a JPEG image (detected {0})")]
    NotJpeg(String),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Invalid target size {0}")]
    InvalidTarget(Size),
    #[error("Tensor shape {actual:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Invalid pixel buffer layout: {0}")]
    Layout(#[from] ndarray::ShapeError),
}

/// Fetches the raw bytes of the bundled image asset.
pub async fn load_asset(path: &Path) -> Result<Vec<u8>, PreprocessError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| PreprocessError::AssetRead {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!("Loaded asset {:?} ({} bytes)", path, bytes.len());
    Ok(bytes)
}

/// Decodes a JPEG byte buffer into a `[H, W, 3]` tensor.
pub fn decode(bytes: &[u8], ledger: &TensorLedger) -> Result<PixelTensor<u8>, PreprocessError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => {}
        Ok(other) => return Err(PreprocessError::NotJpeg(format!("{:?}", other))),
        Err(_) => return Err(PreprocessError::NotJpeg("unknown format".to_string())),
    }

    let rgb = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let data = Array3::from_shape_vec((height as usize, width as usize, 3), rgb.into_raw())?;

    tracing::debug!("Decoded {}x{} image", width, height);
    Ok(PixelTensor::new(ledger, data))
}

/// Bilinear resize into a float tensor of exactly `target`.
pub fn resize(
    tensor: &PixelTensor<u8>,
    target: Size,
    ledger: &TensorLedger,
) -> Result<PixelTensor<f32>, PreprocessError> {
    if target.width == 0 || target.height == 0 {
        return Err(PreprocessError::InvalidTarget(target));
    }

    let source = tensor.size();
    let pixels: Vec<f32> = tensor.view().iter().map(|v| f32::from(*v)).collect();
    let buffer = ImageBuffer::<Rgb<f32>, Vec<f32>>::from_raw(source.width, source.height, pixels)
        .ok_or_else(|| PreprocessError::ShapeMismatch {
            expected: vec![source.height as usize, source.width as usize, 3],
            actual: tensor.shape().to_vec(),
        })?;

    let resized = image::imageops::resize(&buffer, target.width, target.height, FilterType::Triangle);
    let expected = vec![target.height as usize, target.width as usize, 3];
    let data = Array3::from_shape_vec(
        (target.height as usize, target.width as usize, 3),
        resized.into_raw(),
    )?;
    if data.shape() != expected.as_slice() {
        return Err(PreprocessError::ShapeMismatch {
            expected,
            actual: data.shape().to_vec(),
        });
    }

    tracing::debug!("Resized tensor {} -> {}", source, target);
    Ok(PixelTensor::new(ledger, data))
}

/// Truncates float pixels into the integer range the detector consumes.
pub fn cast_to_int(tensor: &PixelTensor<f32>, ledger: &TensorLedger) -> PixelTensor<u8> {
    let data = tensor.view().mapv(|v| v.clamp(0.0, 255.0) as u8);
    PixelTensor::new(ledger, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, RgbImage};
    use std::io::Cursor;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, 95)
            .encode_image(&img)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_jpeg_shape() {
        let ledger = TensorLedger::new();
        let tensor = decode(&jpeg_bytes(64, 48), &ledger).unwrap();
        assert_eq!(tensor.shape(), &[48, 64, 3]);
        assert_eq!(ledger.live(), 1);
    }

    #[test]
    fn test_decode_rejects_png() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();

        let ledger = TensorLedger::new();
        let result = decode(cursor.get_ref(), &ledger);
        assert!(matches!(result, Err(PreprocessError::NotJpeg(_))));
        assert_eq!(ledger.created(), 0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let ledger = TensorLedger::new();
        let result = decode(&[0u8, 1, 2, 3], &ledger);
        assert!(matches!(result, Err(PreprocessError::NotJpeg(_))));
    }

    #[test]
    fn test_resize_produces_requested_shape() {
        let ledger = TensorLedger::new();
        let decoded = decode(&jpeg_bytes(64, 48), &ledger).unwrap();

        let resized = resize(&decoded, Size::new(300, 300), &ledger).unwrap();
        assert_eq!(resized.shape(), &[300, 300, 3]);

        let wide = resize(&decoded, Size::new(120, 30), &ledger).unwrap();
        assert_eq!(wide.shape(), &[30, 120, 3]);
        assert_eq!(wide.size(), Size::new(120, 30));
    }

    #[test]
    fn test_resize_rejects_empty_target() {
        let ledger = TensorLedger::new();
        let decoded = decode(&jpeg_bytes(16, 16), &ledger).unwrap();
        let result = resize(&decoded, Size::new(0, 10), &ledger);
        assert!(matches!(result, Err(PreprocessError::InvalidTarget(_))));
    }

    #[test]
    fn test_cast_truncates_and_clamps() {
        let ledger = TensorLedger::new();
        let mut data = Array3::<f32>::zeros((1, 2, 3));
        data[[0, 0, 0]] = 12.9;
        data[[0, 0, 1]] = -3.0;
        data[[0, 1, 2]] = 300.0;
        let floats = PixelTensor::new(&ledger, data);

        let ints = cast_to_int(&floats, &ledger);
        let view = ints.view();
        assert_eq!(view[[0, 0, 0]], 12);
        assert_eq!(view[[0, 0, 1]], 0);
        assert_eq!(view[[0, 1, 2]], 255);
    }

    #[tokio::test]
    async fn test_load_missing_asset() {
        let result = load_asset(Path::new("./no/such/asset.jpg")).await;
        assert!(matches!(result, Err(PreprocessError::AssetRead { .. })));
    }
}
