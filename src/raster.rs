//! Decoded artwork pixels and their image XObject form.

use image::DynamicImage;
use log::debug;
use lopdf::{Object, ObjectId, Stream, dictionary};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::serialize::deflate;

/// Interleaved 8-bit pixel layouts accepted for artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    GrayAlpha8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::GrayAlpha8 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::GrayAlpha8 | PixelFormat::Rgba8)
    }

    fn color_space(self) -> &'static str {
        match self {
            PixelFormat::Gray8 | PixelFormat::GrayAlpha8 => "DeviceGray",
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => "DeviceRGB",
        }
    }
}

/// A still raster image with known dimensions and pixel format.
#[derive(Debug, Clone)]
pub struct RasterImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap already decoded pixels, checking that the buffer fits the dimensions.
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::UnreadableImage(format!("empty image {width}x{height}")));
        }
        let expected = width as usize * height as usize * format.channels();
        if pixels.len() != expected {
            return Err(Error::UnreadableImage(format!(
                "{width}x{height} {format:?} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// Decode an encoded image file (PNG, JPEG, ...).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = (decoded.width(), decoded.height());
        let (format, pixels) = match decoded {
            DynamicImage::ImageLuma8(buf) => (PixelFormat::Gray8, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (PixelFormat::GrayAlpha8, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (PixelFormat::Rgb8, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (PixelFormat::Rgba8, buf.into_raw()),
            other if other.color().has_alpha() => (PixelFormat::Rgba8, other.to_rgba8().into_raw()),
            other => (PixelFormat::Rgb8, other.to_rgb8().into_raw()),
        };
        debug!("decoded artwork {}x{} {:?}", width, height, format);
        Self::new(width, height, format, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Split interleaved pixels into color samples and an alpha plane.
    /// The alpha plane is omitted when every pixel is opaque.
    fn split_alpha(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        if !self.format.has_alpha() {
            return (self.pixels.clone(), None);
        }
        let channels = self.format.channels();
        let color_channels = channels - 1;
        let pixel_count = self.width as usize * self.height as usize;
        let mut color = Vec::with_capacity(pixel_count * color_channels);
        let mut alpha = Vec::with_capacity(pixel_count);
        for px in self.pixels.chunks_exact(channels) {
            color.extend_from_slice(&px[..color_channels]);
            alpha.push(px[color_channels]);
        }
        if alpha.iter().all(|&a| a == u8::MAX) {
            (color, None)
        } else {
            (color, Some(alpha))
        }
    }
}

/// Store `image` as a Flate-compressed image XObject (plus `/SMask` when it
/// has real transparency) and return the XObject identity.
pub fn add_image_xobject(doc: &mut Document, image: &RasterImage) -> Result<ObjectId> {
    let (color, alpha) = image.split_alpha();

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(image.width as i64),
        "Height" => Object::Integer(image.height as i64),
        "ColorSpace" => image.format.color_space(),
        "BitsPerComponent" => Object::Integer(8),
        "Filter" => "FlateDecode",
    };

    if let Some(alpha) = alpha {
        let smask = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(image.width as i64),
            "Height" => Object::Integer(image.height as i64),
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => "FlateDecode",
        };
        let smask_id = doc.add(compressed_stream(smask, &alpha)?);
        dict.set("SMask", smask_id);
    }

    Ok(doc.add(compressed_stream(dict, &color)?))
}

fn compressed_stream(dict: lopdf::Dictionary, data: &[u8]) -> Result<Stream> {
    let mut stream = Stream::new(dict, deflate(data)?);
    stream.allows_compression = false;
    Ok(stream)
}
