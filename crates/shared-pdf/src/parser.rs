//! PDF parsing and page geometry using lopdf

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::warn;

use crate::error::PdfError;

/// US Letter, used when no MediaBox can be found
pub const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Inheritable page attributes are looked up at most this many levels up
const MAX_TREE_DEPTH: usize = 32;

/// Wrapper around lopdf::Document with page-tree helpers
pub struct PdfDocument {
    pub(crate) doc: Document,
}

impl PdfDocument {
    /// Load a PDF from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PdfError> {
        let doc = Document::load_mem(bytes)?;
        Ok(Self { doc })
    }

    /// Get the number of pages
    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Get page object ID for a given page number (1-indexed)
    pub fn page_id(&self, page_num: u32) -> Option<ObjectId> {
        self.doc.get_pages().get(&page_num).copied()
    }

    pub fn is_encrypted(&self) -> bool {
        self.doc.trailer.get(b"Encrypt").is_ok()
    }

    /// Page MediaBox as [x, y, width, height], inherited through Parent.
    /// Falls back to US Letter when the tree carries no usable box.
    pub fn page_dimensions(&self, page_id: ObjectId) -> [f64; 4] {
        match self
            .inherited_attribute(page_id, b"MediaBox")
            .and_then(|obj| self.parse_rect(obj).ok())
        {
            Some(rect) if rect[2] > 0.0 && rect[3] > 0.0 => rect,
            _ => {
                warn!(?page_id, "Page has no usable MediaBox, assuming US Letter");
                DEFAULT_MEDIA_BOX
            }
        }
    }

    /// The Resources dictionary that applies to a page, cloned and fully
    /// resolved at the top level. Empty when the page tree has none.
    pub fn effective_resources(&self, page_id: ObjectId) -> Dictionary {
        self.inherited_attribute(page_id, b"Resources")
            .and_then(|obj| self.resolve_dict(obj))
            .cloned()
            .unwrap_or_default()
    }

    /// Walk the page and its ancestors for an inheritable attribute
    fn inherited_attribute(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = self.doc.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(value) = current.get(key) {
                return Some(value);
            }
            let parent_id = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = self.doc.get_dictionary(parent_id).ok()?;
        }
        None
    }

    /// Follow a reference (if any) to a dictionary
    pub fn resolve_dict<'a>(&'a self, obj: &'a Object) -> Option<&'a Dictionary> {
        match obj {
            Object::Dictionary(d) => Some(d),
            Object::Reference(id) => self.doc.get_dictionary(*id).ok(),
            _ => None,
        }
    }

    /// Follow a reference (if any) to an array
    pub fn resolve_array<'a>(&'a self, obj: &'a Object) -> Option<&'a Vec<Object>> {
        match obj {
            Object::Array(a) => Some(a),
            Object::Reference(id) => self.doc.get_object(*id).ok()?.as_array().ok(),
            _ => None,
        }
    }

    /// Parse a PDF rectangle array into [x, y, width, height]
    fn parse_rect(&self, obj: &Object) -> Result<[f64; 4], PdfError> {
        let arr = self
            .resolve_array(obj)
            .ok_or_else(|| PdfError::Parse("MediaBox is not an array".to_string()))?;

        if arr.len() != 4 {
            return Err(PdfError::Parse(format!(
                "MediaBox has {} elements, expected 4",
                arr.len()
            )));
        }

        let mut values = [0.0f64; 4];
        for (i, obj) in arr.iter().enumerate() {
            values[i] = self.extract_number(obj)?;
        }

        // Corners may be given in any order
        let (x1, x2) = (values[0].min(values[2]), values[0].max(values[2]));
        let (y1, y2) = (values[1].min(values[3]), values[1].max(values[3]));
        Ok([x1, y1, x2 - x1, y2 - y1])
    }

    /// Extract a number from a PDF object
    fn extract_number(&self, obj: &Object) -> Result<f64, PdfError> {
        match obj {
            Object::Integer(i) => Ok(*i as f64),
            Object::Real(r) => Ok(*r as f64),
            Object::Reference(id) => {
                let resolved = self.doc.get_object(*id)?;
                self.extract_number(resolved)
            }
            _ => Err(PdfError::Parse("Expected number in rectangle".to_string())),
        }
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Serialize the whole document (full rewrite)
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, PdfError> {
        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| PdfError::Operation(format!("Failed to save PDF: {}", e)))?;
        Ok(buffer)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// A `pages`-page PDF. MediaBox is set on the Pages node so every page
    /// inherits it.
    pub fn create_test_pdf(pages: usize, media_box: [i64; 4]) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for i in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {}", i + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => media_box.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    pub fn letter_pdf(pages: usize) -> Vec<u8> {
        create_test_pdf(pages, [0, 0, 612, 792])
    }
}
