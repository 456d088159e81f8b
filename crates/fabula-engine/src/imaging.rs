//! Image preparation: decode, bound, flatten, re-encode as base64.

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use fabula_contracts::ProviderError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::debug;

use crate::transport::{HttpRequest, HttpTransport};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// A decoded raster owned by exactly one pipeline stage.
#[derive(Debug)]
pub struct CanonicalImage {
    image: DynamicImage,
    source_format: Option<ImageFormat>,
}

impl CanonicalImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            source_format: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }

    pub fn source_format(&self) -> Option<ImageFormat> {
        self.source_format
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportFormat {
    #[default]
    Jpeg,
    Png,
}

impl TransportFormat {
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Decodes the full pixel data; the format is sniffed from the bytes, never
/// taken from a file name.
pub fn load_from_bytes(bytes: &[u8]) -> Result<CanonicalImage, ProviderError> {
    let format = image::guess_format(bytes)
        .map_err(|err| ProviderError::image_decode(format!("Invalid image file: {err}")))?;
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| ProviderError::image_decode(format!("Invalid image file: {err}")))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ProviderError::image_decode(
            "Invalid image file: image has no pixels",
        ));
    }
    debug!(
        width = image.width(),
        height = image.height(),
        format = ?format,
        "decoded image"
    );
    Ok(CanonicalImage {
        image,
        source_format: Some(format),
    })
}

/// Fetched bodies are held to the same byte ceiling as uploads.
pub fn load_from_url(
    transport: &dyn HttpTransport,
    url: &str,
    timeout: Duration,
    max_bytes: u64,
) -> Result<CanonicalImage, ProviderError> {
    let trimmed = url.trim();
    let parsed = reqwest::Url::parse(trimmed).map_err(|err| {
        ProviderError::image_fetch(format!("Failed to load image from URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProviderError::image_fetch(format!(
            "Failed to load image from URL: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let response = transport
        .send(&HttpRequest::get(trimmed), timeout)
        .map_err(|err| ProviderError::image_fetch(format!("Failed to load image from URL: {err}")))?;
    if !response.is_success() {
        return Err(ProviderError::image_fetch(format!(
            "Failed to load image from URL: HTTP {}",
            response.status
        )));
    }
    if response.body.len() as u64 > max_bytes {
        return Err(ProviderError::image_fetch(format!(
            "Failed to load image from URL: body exceeds {max_bytes} bytes"
        )));
    }
    load_from_bytes(&response.body)
}

/// Downsizes with Lanczos3 so the limiting side lands exactly on its bound.
pub fn resize(image: CanonicalImage, max_width: u32, max_height: u32) -> CanonicalImage {
    let (width, height) = (image.width(), image.height());
    let (max_width, max_height) = (max_width.max(1), max_height.max(1));
    if width <= max_width && height <= max_height {
        return image;
    }

    let (w, h) = (u64::from(width), u64::from(height));
    let (bw, bh) = (u64::from(max_width), u64::from(max_height));
    let (target_w, target_h) = if w * bh >= h * bw {
        (max_width, scaled(h, bw, w))
    } else {
        (scaled(w, bh, h), max_height)
    };

    debug!(width, height, target_w, target_h, "resizing image");
    CanonicalImage {
        image: image
            .image
            .resize_exact(target_w, target_h, FilterType::Lanczos3),
        source_format: image.source_format,
    }
}

fn scaled(side: u64, bound: u64, reference: u64) -> u32 {
    let value = (side * bound + reference / 2) / reference;
    u32::try_from(value.max(1)).unwrap_or(u32::MAX)
}

/// Consumes the image. JPEG output is composited over opaque white first.
pub fn to_transport_form(
    image: CanonicalImage,
    format: TransportFormat,
    quality: u8,
) -> Result<String, ProviderError> {
    let mut bytes = Vec::new();
    match format {
        TransportFormat::Jpeg => {
            let flattened = flatten_onto_white(&image.image);
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
            encoder
                .encode_image(&DynamicImage::ImageRgb8(flattened))
                .map_err(|err| ProviderError::internal(format!("JPEG encode failed: {err}")))?;
        }
        TransportFormat::Png => {
            image
                .image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map_err(|err| ProviderError::internal(format!("PNG encode failed: {err}")))?;
        }
    }
    Ok(BASE64.encode(bytes))
}

/// Resize to a square bound, then JPEG at the default quality.
pub fn prepare_for_vision(image: CanonicalImage, max_dimension: u32) -> Result<String, ProviderError> {
    to_transport_form(
        resize(image, max_dimension, max_dimension),
        TransportFormat::Jpeg,
        DEFAULT_JPEG_QUALITY,
    )
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}
