//! Detached PDF signatures via incremental update
//!
//! The signed file is the original bytes followed by one appended revision
//! holding the signature dictionary, an invisible signature widget, the
//! updated page, AcroForm and catalog, and a new xref section. Nothing
//! before the append point changes.

use chrono::{DateTime, Utc};
use lopdf::{dictionary, Dictionary, Object, ObjectId, StringFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_crypto::{cms::build_signed_data, verify_detached, SignatureInfo, SigningIdentity};
use tracing::{debug, info};

use crate::error::PdfError;
use crate::parser::PdfDocument;
use crate::writer::{text_string, write_dictionary, write_literal_string};

/// Default bytes reserved for the CMS blob (hex doubles this in the file)
pub const DEFAULT_RESERVED_SIZE: usize = 32768;

/// Widest ByteRange we ever write: four ten-digit offsets
const BYTE_RANGE_PLACEHOLDER: &str = "[0 0000000000 0000000000 0000000000]";

/// Values written into the signature dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureOptions {
    pub signer_name: String,
    pub reason: String,
    pub location: String,
    pub contact_info: String,
    pub reserved_size: usize,
    /// Defaults to now
    pub signing_time: Option<DateTime<Utc>>,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            signer_name: "Signer".to_string(),
            reason: "Approved".to_string(),
            location: "Location".to_string(),
            contact_info: String::new(),
            reserved_size: DEFAULT_RESERVED_SIZE,
            signing_time: None,
        }
    }
}

impl SignatureOptions {
    pub fn new(signer_name: &str, reason: &str, location: &str) -> Self {
        Self {
            signer_name: signer_name.to_string(),
            reason: reason.to_string(),
            location: location.to_string(),
            ..Self::default()
        }
    }

    pub fn with_reserved_size(mut self, reserved_size: usize) -> Self {
        self.reserved_size = reserved_size;
        self
    }
}

/// Result of checking an embedded signature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedPdfSignature {
    pub byte_range: [usize; 4],
    /// False when later revisions were appended after signing
    pub covers_whole_document: bool,
    pub signer: SignatureInfo,
}

/// Sign `source` and return the signed bytes
pub fn sign_pdf<I: SigningIdentity>(
    source: &[u8],
    identity: &I,
    options: &SignatureOptions,
) -> Result<Vec<u8>, PdfError> {
    if options.reserved_size == 0 {
        return Err(PdfError::Operation("signature reservation must be non-zero".to_string()));
    }

    let pdf = PdfDocument::from_bytes(source)?;
    if pdf.is_encrypted() {
        return Err(PdfError::Unsupported("encrypted documents cannot be signed".to_string()));
    }
    let prev_xref = find_startxref(source)?;

    let update = IncrementalUpdate::plan(&pdf)?;
    let signing_time = options.signing_time.unwrap_or_else(Utc::now);

    let mut out = source.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }

    let mut offsets: Vec<(ObjectId, usize)> = Vec::new();

    // Signature dictionary, tracking where the placeholders land
    offsets.push((update.sig_id, out.len()));
    let slots = write_signature_object(&mut out, update.sig_id, options, signing_time);

    for (id, dict) in &update.objects {
        offsets.push((*id, out.len()));
        out.extend_from_slice(format!("{} {} obj\n", id.0, id.1).as_bytes());
        write_dictionary(&mut out, dict)?;
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    write_xref(&mut out, &mut offsets);
    write_trailer(&mut out, &pdf, update.size, prev_xref, xref_offset)?;

    // ByteRange excludes the hex string including its delimiters
    let contents_end = slots.contents_start + 2 + options.reserved_size * 2;
    let byte_range = [
        0,
        slots.contents_start,
        contents_end,
        out.len() - contents_end,
    ];
    fill_byte_range(&mut out, slots.byte_range_at, &byte_range)?;

    let mut hasher = Sha256::new();
    hasher.update(&out[..byte_range[1]]);
    hasher.update(&out[byte_range[2]..]);
    let digest: [u8; 32] = hasher.finalize().into();

    let cms = build_signed_data(identity, &digest, signing_time)?;
    if cms.len() > options.reserved_size {
        return Err(PdfError::Capacity {
            required: cms.len(),
            reserved: options.reserved_size,
        });
    }

    let hex_sig = hex::encode(&cms);
    let start = slots.contents_start + 1;
    out[start..start + hex_sig.len()].copy_from_slice(hex_sig.as_bytes());

    info!(
        bytes = out.len(),
        cms_bytes = cms.len(),
        reserved = options.reserved_size,
        "Applied detached signature"
    );
    Ok(out)
}

/// Check the last signature in `bytes` against its ByteRange
pub fn verify_pdf(bytes: &[u8]) -> Result<VerifiedPdfSignature, PdfError> {
    let marker = find_last_occurrence(bytes, b"/ByteRange")
        .ok_or_else(|| PdfError::Parse("document carries no signature".to_string()))?;
    let byte_range = parse_byte_range(&bytes[marker..])?;
    let [start, first_len, second_start, second_len] = byte_range;

    if start != 0
        || first_len >= second_start
        || second_start.saturating_add(second_len) > bytes.len()
        || bytes.get(first_len) != Some(&b'<')
        || bytes.get(second_start - 1) != Some(&b'>')
    {
        return Err(PdfError::Parse(format!("inconsistent ByteRange {:?}", byte_range)));
    }

    let hex_contents = &bytes[first_len + 1..second_start - 1];
    let cms = hex::decode(hex_contents)
        .map_err(|e| PdfError::Parse(format!("signature contents are not hex: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes[..first_len]);
    hasher.update(&bytes[second_start..second_start + second_len]);
    let digest: [u8; 32] = hasher.finalize().into();

    let signer = verify_detached(&cms, &digest)?;
    Ok(VerifiedPdfSignature {
        byte_range,
        covers_whole_document: second_start + second_len == bytes.len(),
        signer,
    })
}

/// Objects rewritten or added by the appended revision (besides the
/// signature dictionary itself)
struct IncrementalUpdate {
    sig_id: ObjectId,
    objects: Vec<(ObjectId, Dictionary)>,
    /// Trailer /Size after the update
    size: u32,
}

impl IncrementalUpdate {
    fn plan(pdf: &PdfDocument) -> Result<Self, PdfError> {
        let doc = pdf.doc();
        let page_id = pdf
            .page_id(1)
            .ok_or_else(|| PdfError::Parse("document has no pages".to_string()))?;
        let catalog_id = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| PdfError::Parse("trailer has no Root reference".to_string()))?;

        let declared_size = doc
            .trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .unwrap_or(0)
            .max(0) as u32;
        let mut next_id = declared_size.max(doc.max_id + 1);
        let mut allocate = || {
            let id = (next_id, 0);
            next_id += 1;
            id
        };

        let sig_id = allocate();
        let widget_id = allocate();
        let mut objects = Vec::new();

        // AcroForm: update in place, inline into the catalog, or create
        let catalog = doc.get_dictionary(catalog_id)?.clone();
        let field_count;
        match catalog.get(b"AcroForm") {
            Ok(Object::Reference(form_id)) => {
                let mut form = doc.get_dictionary(*form_id)?.clone();
                field_count = add_field(pdf, &mut form, widget_id);
                objects.push((*form_id, form));
            }
            Ok(Object::Dictionary(inline)) => {
                let mut form = inline.clone();
                field_count = add_field(pdf, &mut form, widget_id);
                let mut catalog = catalog.clone();
                catalog.set("AcroForm", Object::Dictionary(form));
                objects.push((catalog_id, catalog));
            }
            _ => {
                let form_id = allocate();
                let mut form = Dictionary::new();
                field_count = add_field(pdf, &mut form, widget_id);
                objects.push((form_id, form));
                let mut catalog = catalog.clone();
                catalog.set("AcroForm", Object::Reference(form_id));
                objects.push((catalog_id, catalog));
            }
        }

        let widget = dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Sig",
            "T" => Object::String(format!("Signature{}", field_count).into_bytes(), StringFormat::Literal),
            "V" => sig_id,
            "Rect" => vec![0.into(), 0.into(), 0.into(), 0.into()],
            // Print | Locked
            "F" => 132,
            "P" => page_id,
        };
        objects.push((widget_id, widget));

        let mut page = doc.get_dictionary(page_id)?.clone();
        let mut annots = page
            .get(b"Annots")
            .ok()
            .and_then(|obj| pdf.resolve_array(obj))
            .cloned()
            .unwrap_or_default();
        annots.push(Object::Reference(widget_id));
        page.set("Annots", Object::Array(annots));
        objects.push((page_id, page));

        debug!(?sig_id, ?widget_id, objects = objects.len() + 1, "Planned incremental update");
        Ok(Self {
            sig_id,
            objects,
            size: next_id,
        })
    }
}

/// Append the widget to /Fields and set SigFlags; returns the new field count
fn add_field(pdf: &PdfDocument, form: &mut Dictionary, widget_id: ObjectId) -> usize {
    let mut fields = form
        .get(b"Fields")
        .ok()
        .and_then(|obj| pdf.resolve_array(obj))
        .cloned()
        .unwrap_or_default();
    fields.push(Object::Reference(widget_id));
    let count = fields.len();
    form.set("Fields", Object::Array(fields));
    // SignaturesExist | AppendOnly
    form.set("SigFlags", 3);
    count
}

struct PlaceholderSlots {
    /// Offset of the first byte of the ByteRange placeholder
    byte_range_at: usize,
    /// Offset of the `<` opening the Contents hex string
    contents_start: usize,
}

fn write_signature_object(
    out: &mut Vec<u8>,
    id: ObjectId,
    options: &SignatureOptions,
    signing_time: DateTime<Utc>,
) -> PlaceholderSlots {
    out.extend_from_slice(format!("{} {} obj\n", id.0, id.1).as_bytes());
    out.extend_from_slice(b"<</Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached");

    for (key, value) in [
        ("Name", &options.signer_name),
        ("Reason", &options.reason),
        ("Location", &options.location),
        ("ContactInfo", &options.contact_info),
    ] {
        out.extend_from_slice(format!(" /{} ", key).as_bytes());
        write_literal_string(out, &text_string(value));
    }

    let pdf_date = signing_time.format("D:%Y%m%d%H%M%S+00'00'").to_string();
    out.extend_from_slice(b" /M ");
    write_literal_string(out, pdf_date.as_bytes());

    out.extend_from_slice(b" /ByteRange ");
    let byte_range_at = out.len();
    out.extend_from_slice(BYTE_RANGE_PLACEHOLDER.as_bytes());

    out.extend_from_slice(b" /Contents ");
    let contents_start = out.len();
    out.push(b'<');
    out.resize(out.len() + options.reserved_size * 2, b'0');
    out.push(b'>');
    out.extend_from_slice(b">>\nendobj\n");

    PlaceholderSlots {
        byte_range_at,
        contents_start,
    }
}

/// Classic xref section grouped into contiguous subsections
fn write_xref(out: &mut Vec<u8>, offsets: &mut [(ObjectId, usize)]) {
    offsets.sort_by_key(|((id, _), _)| *id);
    out.extend_from_slice(b"xref\n");

    let mut i = 0;
    while i < offsets.len() {
        let mut j = i + 1;
        while j < offsets.len() && offsets[j].0 .0 == offsets[j - 1].0 .0 + 1 {
            j += 1;
        }
        out.extend_from_slice(format!("{} {}\n", offsets[i].0 .0, j - i).as_bytes());
        for ((_, generation), offset) in &offsets[i..j] {
            out.extend_from_slice(format!("{:010} {:05} n\r\n", offset, generation).as_bytes());
        }
        i = j;
    }
}

fn write_trailer(
    out: &mut Vec<u8>,
    pdf: &PdfDocument,
    size: u32,
    prev_xref: usize,
    xref_offset: usize,
) -> Result<(), PdfError> {
    let old = &pdf.doc().trailer;
    let mut trailer = Dictionary::new();
    trailer.set("Size", size as i64);
    for key in [b"Root".as_slice(), b"Info".as_slice(), b"ID".as_slice()] {
        if let Ok(value) = old.get(key) {
            trailer.set(key.to_vec(), value.clone());
        }
    }
    trailer.set("Prev", prev_xref as i64);

    out.extend_from_slice(b"trailer\n");
    write_dictionary(out, &trailer)?;
    out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    Ok(())
}

fn fill_byte_range(out: &mut [u8], at: usize, range: &[usize; 4]) -> Result<(), PdfError> {
    let text = format!("[{} {} {} {}]", range[0], range[1], range[2], range[3]);
    let width = BYTE_RANGE_PLACEHOLDER.len();
    if text.len() > width {
        return Err(PdfError::Operation("document too large for ByteRange".to_string()));
    }
    out[at..at + text.len()].copy_from_slice(text.as_bytes());
    for b in &mut out[at + text.len()..at + width] {
        *b = b' ';
    }
    Ok(())
}

/// Offset of the most recent cross-reference section
fn find_startxref(bytes: &[u8]) -> Result<usize, PdfError> {
    let pos = find_last_occurrence(bytes, b"startxref")
        .ok_or_else(|| PdfError::Parse("missing startxref".to_string()))?;
    let digits: String = bytes[pos + b"startxref".len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    digits
        .parse()
        .map_err(|_| PdfError::Parse("startxref offset is not a number".to_string()))
}

fn parse_byte_range(from_marker: &[u8]) -> Result<[usize; 4], PdfError> {
    let open = from_marker
        .iter()
        .position(|&b| b == b'[')
        .ok_or_else(|| PdfError::Parse("ByteRange has no array".to_string()))?;
    let close = from_marker[open..]
        .iter()
        .position(|&b| b == b']')
        .ok_or_else(|| PdfError::Parse("ByteRange array is not closed".to_string()))?;
    let inner = std::str::from_utf8(&from_marker[open + 1..open + close])
        .map_err(|_| PdfError::Parse("ByteRange is not ASCII".to_string()))?;

    let values: Vec<usize> = inner
        .split_ascii_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| PdfError::Parse(format!("ByteRange values are not offsets: {}", inner)))?;
    values
        .try_into()
        .map_err(|v: Vec<usize>| PdfError::Parse(format!("ByteRange has {} values, expected 4", v.len())))
}

/// Find the last occurrence of a pattern in bytes
fn find_last_occurrence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let len = needle.len();
    if len == 0 || len > haystack.len() {
        return None;
    }

    (0..=(haystack.len() - len))
        .rev()
        .find(|&i| &haystack[i..i + len] == needle)
}
