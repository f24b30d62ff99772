use image::RgbImage;
use zune_jpeg::JpegDecoder;

use super::frame::{Frame, PixelFormat};
use crate::error::DecodeError;

/// Decode a frame buffer into packed RGB pixels.
pub fn decode_frame(frame: &Frame) -> Result<RgbImage, DecodeError> {
    decode_buffer(&frame.data, frame.meta.width, frame.meta.height, frame.meta.format)
}

pub fn decode_buffer(
    data: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RgbImage, DecodeError> {
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Rgb24 => {
            let pixels = exact(data, width, height, 3)?;
            to_image(width, height, pixels.to_vec())
        }
        PixelFormat::Bgr24 => {
            let pixels = exact(data, width, height, 3)?;
            let mut rgb = Vec::with_capacity(pixels.len());
            for chunk in pixels.chunks_exact(3) {
                rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
            }
            to_image(width, height, rgb)
        }
        PixelFormat::Yuyv4 => {
            let pixels = exact(data, width, height, 2)?;
            to_image(width, height, yuyv_to_rgb(pixels))
        }
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Jpeg(format!("{e:?}")))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| DecodeError::Jpeg("missing dimensions".into()))?;
    let (width, height) = (width as u32, height as u32);

    let area = width as usize * height as usize;
    if pixels.len() == area {
        // Grayscale stream, expand to RGB
        let rgb = pixels.iter().flat_map(|&l| [l, l, l]).collect();
        return to_image(width, height, rgb);
    }
    to_image(width, height, pixels)
}

fn exact(data: &[u8], width: u32, height: u32, bpp: usize) -> Result<&[u8], DecodeError> {
    let expected = width as usize * height as usize * bpp;
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    Ok(&data[..expected])
}

fn to_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<RgbImage, DecodeError> {
    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(DecodeError::Truncated {
        expected: width as usize * height as usize * 3,
        actual,
    })
}

/// BT.601 YUYV 4:2:2 to RGB24.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;
    [clamp(r), clamp(g), clamp(b)]
}

fn clamp(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
