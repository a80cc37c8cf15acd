//! Image embedding: wrap a PNG or JPEG into a single-page PDF.
//!
//! The page is sized to the image's pixel dimensions (one pixel per PDF
//! point) and the image is drawn over the whole page, so the model sees the
//! scan at its native resolution.
//!
//! JPEG data is embedded as-is under `DCTDecode`. PNG data is decoded,
//! flattened onto white and re-encoded as a high-quality JPEG; PDF viewers
//! and model providers all read `DCTDecode`, and it keeps the payload small.

use crate::error::ReceiptError;
use crate::pipeline::input::SourceFormat;
use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ColorType, DynamicImage, ExtendedColorType, ImageDecoder, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Cursor;
use tracing::debug;

/// JPEG quality used when re-encoding PNG scans.
const REENCODE_QUALITY: u8 = 92;

/// An image ready to be placed in a PDF.
struct DctImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    data: Vec<u8>,
}

/// Wrap image bytes into a one-page PDF and return the serialised document.
pub fn image_to_pdf(bytes: &[u8], format: SourceFormat) -> Result<Vec<u8>, ReceiptError> {
    let image = match format {
        SourceFormat::Jpeg => jpeg_passthrough(bytes)?,
        SourceFormat::Png => png_to_jpeg(bytes)?,
        SourceFormat::Pdf => {
            return Err(ReceiptError::Internal(
                "image_to_pdf called with PDF bytes".into(),
            ))
        }
    };
    debug!(
        "Embedding {} image {}x{} ({} bytes) into a PDF page",
        format.as_str(),
        image.width,
        image.height,
        image.data.len()
    );
    single_page_pdf(image).map_err(|e| embed_error(format, e))
}

/// Page sizes (width, height in points) of every page of a PDF, in page order.
pub fn pdf_page_sizes(bytes: &[u8]) -> Result<Vec<(f32, f32)>, ReceiptError> {
    let doc = Document::load_mem(bytes).map_err(|e| ReceiptError::EmbedFailed {
        format: "pdf".into(),
        detail: format!("unreadable PDF: {e}"),
    })?;

    let mut sizes = Vec::new();
    for page_id in doc.get_pages().into_values() {
        let media_box = page_media_box(&doc, page_id).ok_or_else(|| ReceiptError::EmbedFailed {
            format: "pdf".into(),
            detail: format!("page {page_id:?} has no MediaBox"),
        })?;
        sizes.push(media_box);
    }
    Ok(sizes)
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn jpeg_passthrough(bytes: &[u8]) -> Result<DctImage, ReceiptError> {
    let decoder =
        JpegDecoder::new(Cursor::new(bytes)).map_err(|e| embed_error(SourceFormat::Jpeg, e))?;
    let (width, height) = decoder.dimensions();
    let is_cmyk = matches!(decoder.original_color_type(), ExtendedColorType::Cmyk8);
    let color_space = match decoder.color_type() {
        ColorType::L8 | ColorType::L16 => "DeviceGray",
        _ => "DeviceRGB",
    };
    // Full decode catches truncated or corrupt scans before they reach the model.
    let decoded =
        DynamicImage::from_decoder(decoder).map_err(|e| embed_error(SourceFormat::Jpeg, e))?;
    check_dimensions(SourceFormat::Jpeg, width, height)?;

    if is_cmyk {
        // Adobe CMYK JPEGs store inverted channels; re-encode as RGB instead.
        return encode_rgb_jpeg(SourceFormat::Jpeg, &decoded.to_rgb8());
    }

    Ok(DctImage {
        width,
        height,
        color_space,
        data: bytes.to_vec(),
    })
}

fn png_to_jpeg(bytes: &[u8]) -> Result<DctImage, ReceiptError> {
    let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map_err(|e| embed_error(SourceFormat::Png, e))?;
    check_dimensions(SourceFormat::Png, decoded.width(), decoded.height())?;
    encode_rgb_jpeg(SourceFormat::Png, &flatten_on_white(&decoded))
}

fn encode_rgb_jpeg(source: SourceFormat, rgb: &RgbImage) -> Result<DctImage, ReceiptError> {
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, REENCODE_QUALITY)
        .encode_image(rgb)
        .map_err(|e| embed_error(source, e))?;

    Ok(DctImage {
        width: rgb.width(),
        height: rgb.height(),
        color_space: "DeviceRGB",
        data,
    })
}

/// Composite transparent pixels over a white background.
fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn check_dimensions(format: SourceFormat, width: u32, height: u32) -> Result<(), ReceiptError> {
    if width == 0 || height == 0 {
        return Err(ReceiptError::EmbedFailed {
            format: format.as_str().into(),
            detail: format!("image has zero dimension ({width}x{height})"),
        });
    }
    Ok(())
}

fn single_page_pdf(image: DctImage) -> Result<Vec<u8>, lopdf::Error> {
    let width = i64::from(image.width);
    let height = i64::from(image.height);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        image.data,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf)?;
    Ok(buf)
}

/// MediaBox of a page as (width, height), following `Parent` inheritance.
fn page_media_box(doc: &Document, page_id: lopdf::ObjectId) -> Option<(f32, f32)> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    loop {
        if let Ok(obj) = current.get(b"MediaBox") {
            let arr = match obj {
                Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
                other => other.as_array().ok()?,
            };
            let nums: Vec<f32> = arr.iter().filter_map(object_as_f32).collect();
            if nums.len() != 4 {
                return None;
            }
            return Some(((nums[2] - nums[0]).abs(), (nums[3] - nums[1]).abs()));
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
}

fn object_as_f32(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn embed_error(format: SourceFormat, e: impl std::fmt::Display) -> ReceiptError {
    ReceiptError::EmbedFailed {
        format: format.as_str().into(),
        detail: e.to_string(),
    }
}
