//! Stamp a signature image onto PDF pages at percentage coordinates

use std::collections::BTreeMap;

use lopdf::{dictionary, Dictionary, Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coords::percent_to_pdf;
use crate::error::PdfError;
use crate::image::{add_image_xobject, compressed_stream, decode_png};
use crate::parser::PdfDocument;
use crate::writer::format_real;

/// Default box when a placement carries no dimensions
pub const DEFAULT_WIDTH: f64 = 150.0;
pub const DEFAULT_HEIGHT: f64 = 50.0;

/// One image box to draw
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StampPlacement {
    /// 1-based
    pub page: u32,
    pub x_pct: f64,
    pub y_pct: f64,
    pub width: f64,
    pub height: f64,
}

impl StampPlacement {
    pub fn new(page: u32, x_pct: f64, y_pct: f64) -> Self {
        Self {
            page,
            x_pct,
            y_pct,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Draw `image` (PNG) at every placement and return a new PDF.
///
/// Without an image or placements the source is returned unchanged.
/// Placements on pages that do not exist are skipped.
pub fn embed(
    source: &[u8],
    image: Option<&[u8]>,
    placements: &[StampPlacement],
) -> Result<Vec<u8>, PdfError> {
    let image = match image {
        Some(bytes) if !placements.is_empty() => bytes,
        _ => return Ok(source.to_vec()),
    };

    let decoded = decode_png(image)?;
    let mut pdf = PdfDocument::from_bytes(source)?;
    if pdf.is_encrypted() {
        return Err(PdfError::Unsupported("encrypted documents cannot be stamped".to_string()));
    }

    // Resolve every placement first so the image is only added when used
    let mut draws: BTreeMap<ObjectId, Vec<(f64, f64, f64, f64)>> = BTreeMap::new();
    for placement in placements {
        let Some(page_id) = pdf.page_id(placement.page) else {
            warn!(
                page = placement.page,
                page_count = pdf.page_count(),
                "Skipping placement on a page that does not exist"
            );
            continue;
        };
        let media_box = pdf.page_dimensions(page_id);
        let (x, y) = percent_to_pdf(media_box, placement.x_pct, placement.y_pct, placement.height);
        draws
            .entry(page_id)
            .or_default()
            .push((x, y, placement.width, placement.height));
    }

    if draws.is_empty() {
        return Ok(source.to_vec());
    }

    let image_id = add_image_xobject(pdf.doc_mut(), &decoded)?;

    for (page_id, boxes) in &draws {
        let name = register_xobject(&mut pdf, *page_id, image_id)?;
        let mut ops = String::new();
        for (x, y, w, h) in boxes {
            ops.push_str(&format!(
                "q {} 0 0 {} {} {} cm /{} Do Q\n",
                format_real(*w),
                format_real(*h),
                format_real(*x),
                format_real(*y),
                name
            ));
        }
        append_page_content(&mut pdf, *page_id, ops.as_bytes())?;
        debug!(?page_id, count = boxes.len(), "Stamped signature image");
    }

    pdf.save_to_bytes()
}

/// Give the page its own Resources with the image under a fresh name
fn register_xobject(
    pdf: &mut PdfDocument,
    page_id: ObjectId,
    image_id: ObjectId,
) -> Result<String, PdfError> {
    let mut resources = pdf.effective_resources(page_id);
    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| pdf.resolve_dict(obj))
        .cloned()
        .unwrap_or_default();

    let name = (0..)
        .map(|i| format!("ImSig{}", i))
        .find(|n| xobjects.get(n.as_bytes()).is_err())
        .unwrap_or_else(|| "ImSig".to_string());

    xobjects.set(name.as_bytes().to_vec(), Object::Reference(image_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    page_dict_mut(pdf, page_id)?.set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// Wrap the existing content in q/Q and append `ops` as a new stream, so
/// leftover graphics state from the original never leaks into the stamp
fn append_page_content(
    pdf: &mut PdfDocument,
    page_id: ObjectId,
    ops: &[u8],
) -> Result<(), PdfError> {
    let existing: Vec<Object> = {
        let page = pdf.doc().get_dictionary(page_id)?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match pdf.doc().get_object(*id) {
                // A referenced array of streams
                Ok(Object::Array(arr)) => arr.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(arr)) => arr.clone(),
            _ => Vec::new(),
        }
    };

    let doc = pdf.doc_mut();
    let draw_id = doc.add_object(compressed_stream(Dictionary::new(), ops)?);

    let mut contents = Vec::with_capacity(existing.len() + 3);
    if !existing.is_empty() {
        let save_id = doc.add_object(compressed_stream(dictionary! {}, b"q\n")?);
        let restore_id = doc.add_object(compressed_stream(dictionary! {}, b"\nQ\n")?);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(restore_id));
    }
    contents.push(Object::Reference(draw_id));

    page_dict_mut(pdf, page_id)?.set("Contents", Object::Array(contents));
    Ok(())
}

fn page_dict_mut(pdf: &mut PdfDocument, page_id: ObjectId) -> Result<&mut Dictionary, PdfError> {
    pdf.doc_mut()
        .get_object_mut(page_id)?
        .as_dict_mut()
        .map_err(|_| PdfError::Parse("Page is not a dictionary".to_string()))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn placement_defaults(page in 1u32..500, x in 0.0f64..100.0, y in 0.0f64..100.0) {
            let p = StampPlacement::new(page, x, y);
            prop_assert_eq!(p.width, DEFAULT_WIDTH);
            prop_assert_eq!(p.height, DEFAULT_HEIGHT);
            prop_assert_eq!(p.page, page);
        }
    }
}
