//! Raster signature images as PDF image XObjects

use std::io::{Cursor, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::error::PdfError;

/// Reject images beyond this edge length before allocating a frame buffer
const MAX_DIMENSION: u32 = 8192;

/// A decoded 8-bit image split into color and alpha planes
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// `DeviceRGB` when true, `DeviceGray` otherwise
    pub rgb: bool,
    pub color: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

/// Decode a PNG. Palette, low bit-depth, and 16-bit images are normalized to 8 bits.
pub fn decode_png(bytes: &[u8]) -> Result<DecodedImage, PdfError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| PdfError::Image(format!("not a PNG image: {}", e)))?;

    let (width, height) = {
        let info = reader.info();
        (info.width, info.height)
    };
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PdfError::Image(format!(
            "unsupported image size {}x{}",
            width, height
        )));
    }

    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader
        .next_frame(&mut buf)
        .map_err(|e| PdfError::Image(format!("corrupt PNG data: {}", e)))?;
    let data = &buf[..frame.buffer_size()];

    let (channels, rgb, has_alpha) = match frame.color_type {
        png::ColorType::Grayscale => (1, false, false),
        png::ColorType::GrayscaleAlpha => (2, false, true),
        png::ColorType::Rgb => (3, true, false),
        png::ColorType::Rgba => (4, true, true),
        png::ColorType::Indexed => {
            return Err(PdfError::Image("palette was not expanded".to_string()))
        }
    };
    if frame.bit_depth != png::BitDepth::Eight {
        return Err(PdfError::Image(format!(
            "unexpected bit depth {:?} after expansion",
            frame.bit_depth
        )));
    }

    let color_channels = if rgb { 3 } else { 1 };
    let pixels = (width as usize) * (height as usize);
    let mut color = Vec::with_capacity(pixels * color_channels);
    let mut alpha = has_alpha.then(|| Vec::with_capacity(pixels));

    for px in data.chunks_exact(channels) {
        color.extend_from_slice(&px[..color_channels]);
        if let Some(a) = alpha.as_mut() {
            a.push(px[channels - 1]);
        }
    }

    Ok(DecodedImage {
        width,
        height,
        rgb,
        color,
        alpha,
    })
}

pub(crate) fn deflate(data: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PdfError::Operation(format!("compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PdfError::Operation(format!("compression failed: {}", e)))
}

/// A Flate-compressed stream that lopdf will not re-encode
pub(crate) fn compressed_stream(mut dict: lopdf::Dictionary, data: &[u8]) -> Result<Stream, PdfError> {
    dict.set("Filter", "FlateDecode");
    let mut stream = Stream::new(dict, deflate(data)?);
    stream.allows_compression = false;
    Ok(stream)
}

/// Add the image (and its soft mask, if any) to the document
pub fn add_image_xobject(doc: &mut Document, image: &DecodedImage) -> Result<ObjectId, PdfError> {
    let smask_id = match &image.alpha {
        Some(alpha) => {
            let mask = compressed_stream(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => image.width as i64,
                    "Height" => image.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                alpha,
            )?;
            Some(doc.add_object(mask))
        }
        None => None,
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "ColorSpace" => if image.rgb { "DeviceRGB" } else { "DeviceGray" },
        "BitsPerComponent" => 8,
    };
    if let Some(id) = smask_id {
        dict.set("SMask", Object::Reference(id));
    }

    let stream = compressed_stream(dict, &image.color)?;
    Ok(doc.add_object(stream))
}
