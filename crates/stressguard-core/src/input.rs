//! Turning caller payloads into RGB rasters.
//!
//! Accepts encoded image bytes (any format the `image` crate decodes), base64
//! text with or without a `data:` URL header, and raw BGR pixel buffers as
//! produced by OpenCV-style capture code.

use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Decode PNG/JPEG/... bytes into an RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError("empty payload".into()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| DecodeError(format!("undecodable image: {e}")))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError(format!(
            "decoded image has zero size ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(image)
}

/// Decode a base64 payload. Anything up to the last comma (a data URL header
/// such as `data:image/jpeg;base64,`) is discarded, and ASCII whitespace
/// (MIME line wrapping) is ignored.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let body: String = payload
        .rsplit(',')
        .next()
        .unwrap_or(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if body.is_empty() {
        return Err(DecodeError("empty base64 payload".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(&body)
        .map_err(|e| DecodeError(format!("invalid base64: {e}")))
}

/// Build an RGB raster from tightly packed 8-bit BGR pixels.
pub fn rgb_from_bgr(width: u32, height: u32, bgr: &[u8]) -> Result<RgbImage, DecodeError> {
    let expected = width as usize * height as usize * 3;
    if width == 0 || height == 0 || bgr.len() != expected {
        return Err(DecodeError(format!(
            "BGR buffer of {} bytes does not match {width}x{height}x3",
            bgr.len()
        )));
    }
    let rgb: Vec<u8> = bgr.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect();
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| DecodeError(format!("cannot build {width}x{height} raster")))
}

/// Encode `raster` as PNG. Used by the CLI and tests to build payloads.
pub fn encode_png(raster: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = std::io::Cursor::new(Vec::new());
    raster.write_to(&mut buf, image::ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample_png() -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]))).unwrap()
    }

    #[test]
    fn test_decode_png() {
        let image = decode_image(&sample_png()).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(image.get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_image(b"definitely not an image").is_err());
        assert!(decode_image(&[]).is_err());
    }

    #[test]
    fn test_truncated_png() {
        let png = sample_png();
        assert!(decode_image(&png[..png.len() / 2]).is_err());
    }

    #[test]
    fn test_base64_plain_and_data_url() {
        let png = sample_png();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
        assert_eq!(decode_base64_payload(&b64).unwrap(), png);
        let url = format!("data:image/png;base64,{b64}");
        assert_eq!(decode_base64_payload(&url).unwrap(), png);
    }

    #[test]
    fn test_base64_mime_wrapped() {
        let png = encode_png(&RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]))).unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
        assert!(b64.len() > 76);
        let wrapped = b64
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert_eq!(decode_base64_payload(&wrapped).unwrap(), png);
        let url = format!("data:image/png;base64,\n{wrapped}\n");
        assert_eq!(decode_base64_payload(&url).unwrap(), png);
    }

    #[test]
    fn test_base64_invalid() {
        assert!(decode_base64_payload("@@@not-base64@@@").is_err());
        assert!(decode_base64_payload("data:image/png;base64,").is_err());
        assert!(decode_base64_payload("").is_err());
    }

    #[test]
    fn test_rgb_from_bgr() {
        let image = rgb_from_bgr(2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(image.get_pixel(1, 0).0, [6, 5, 4]);
        assert!(rgb_from_bgr(2, 2, &[0; 5]).is_err());
        assert!(rgb_from_bgr(0, 1, &[]).is_err());
    }
}
