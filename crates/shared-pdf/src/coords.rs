//! Percentage-based placement coordinates
//!
//! Signature positions arrive as percentages of the rendered page, measured
//! from the top-left corner. These helpers validate and normalize them and
//! convert to PDF user space (points, origin bottom-left).

use serde::{Deserialize, Serialize};

pub const MIN_COORDINATE: f64 = 0.0;
pub const MAX_COORDINATE: f64 = 100.0;
/// Percent of the page treated as "near the edge"
pub const MARGIN: f64 = 5.0;
pub const MIN_SIGNATURE_WIDTH: f64 = 50.0;
pub const MAX_SIGNATURE_WIDTH: f64 = 300.0;
pub const MIN_SIGNATURE_HEIGHT: f64 = 30.0;
pub const MAX_SIGNATURE_HEIGHT: f64 = 150.0;

/// Where a missing coordinate is clamped to
const CENTER: f64 = 50.0;

const VALID_MESSAGE: &str = "Coordinates are valid and within acceptable bounds";
const INVALID_MESSAGE: &str = "Validation failed. See errorDetails for specifics.";
const DIMENSIONS_INVALID: &str = "Signature dimensions out of acceptable range";
const DATA_MISSING: &str = "Signature data is missing.";

/// Outcome of validating a proposed placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub x_valid: bool,
    pub y_valid: bool,
    pub page_valid: bool,
    pub data_present: bool,
    pub is_valid: bool,
    pub message: String,
    pub error_details: Option<String>,
    pub recommended_x: Option<f64>,
    pub recommended_y: Option<f64>,
}

impl ValidationResult {
    /// Position checks only, ignoring whether signature data was supplied
    pub fn position_valid(&self) -> bool {
        self.x_valid && self.y_valid && self.page_valid
    }
}

/// Validate a proposed position and the presence of signature data.
///
/// Each failing axis gets a clamped recommendation.
pub fn validate_coordinates(
    x: Option<f64>,
    y: Option<f64>,
    page: Option<i64>,
    signature_data: Option<&str>,
) -> ValidationResult {
    evaluate(x, y, page, signature_data, true)
}

/// Position checks alone, for placements that carry no signature data yet
pub fn validate_position(x: Option<f64>, y: Option<f64>, page: Option<i64>) -> ValidationResult {
    evaluate(x, y, page, None, false)
}

fn evaluate(
    x: Option<f64>,
    y: Option<f64>,
    page: Option<i64>,
    signature_data: Option<&str>,
    require_data: bool,
) -> ValidationResult {
    let x_valid = is_coordinate_valid(x);
    let y_valid = is_coordinate_valid(y);
    let page_valid = page.is_some_and(|p| p >= 1);
    let data_present = signature_data.is_some_and(|d| !d.is_empty());
    let is_valid = x_valid && y_valid && page_valid && (data_present || !require_data);

    if is_valid {
        return ValidationResult {
            x_valid,
            y_valid,
            page_valid,
            data_present,
            is_valid,
            message: VALID_MESSAGE.to_string(),
            error_details: None,
            recommended_x: None,
            recommended_y: None,
        };
    }

    let mut reasons = Vec::new();
    let mut recommended_x = None;
    let mut recommended_y = None;
    if !x_valid {
        reasons.push("X coordinate out of bounds.");
        recommended_x = Some(clamp(x));
    }
    if !y_valid {
        reasons.push("Y coordinate out of bounds.");
        recommended_y = Some(clamp(y));
    }
    if !page_valid {
        reasons.push("Invalid page number.");
    }
    if require_data && !data_present {
        reasons.push(DATA_MISSING);
    }

    ValidationResult {
        x_valid,
        y_valid,
        page_valid,
        data_present,
        is_valid,
        message: INVALID_MESSAGE.to_string(),
        error_details: Some(reasons.join(" ")),
        recommended_x,
        recommended_y,
    }
}

/// Coordinates plus optional dimensions, as submitted by a signer
pub fn validate_placement(
    x: Option<f64>,
    y: Option<f64>,
    page: Option<i64>,
    signature_data: Option<&str>,
    width: Option<f64>,
    height: Option<f64>,
) -> ValidationResult {
    let mut result = validate_coordinates(x, y, page, signature_data);
    if !validate_dimensions(width, height) {
        result.is_valid = false;
        result.message = INVALID_MESSAGE.to_string();
        result.error_details = Some(DIMENSIONS_INVALID.to_string());
    }
    result
}

fn is_coordinate_valid(v: Option<f64>) -> bool {
    v.is_some_and(|v| (MIN_COORDINATE..=MAX_COORDINATE).contains(&v))
}

/// Clamp into [0, 100]; a missing value becomes the page center
pub fn clamp(v: Option<f64>) -> f64 {
    match v {
        Some(v) => v.min(MAX_COORDINATE).max(MIN_COORDINATE),
        None => CENTER,
    }
}

pub fn normalize_coordinate(v: Option<f64>) -> f64 {
    clamp(v)
}

/// Dimensions are optional; when both are given each must be in range
pub fn validate_dimensions(width: Option<f64>, height: Option<f64>) -> bool {
    match (width, height) {
        (Some(w), Some(h)) => {
            (MIN_SIGNATURE_WIDTH..=MAX_SIGNATURE_WIDTH).contains(&w)
                && (MIN_SIGNATURE_HEIGHT..=MAX_SIGNATURE_HEIGHT).contains(&h)
        }
        _ => true,
    }
}

pub fn is_near_edge(x: f64, y: f64) -> bool {
    let near = |v: f64| v < MARGIN || v > MAX_COORDINATE - MARGIN;
    near(x) || near(y)
}

/// True when the points are closer than `threshold` percent
pub fn coordinates_overlap(x1: f64, y1: f64, x2: f64, y2: f64, threshold: f64) -> bool {
    (x2 - x1).hypot(y2 - y1) < threshold
}

pub fn pixel_to_percent(px: f64, container_size: Option<f64>) -> f64 {
    match container_size {
        Some(size) if size != 0.0 => px / size * 100.0,
        _ => 0.0,
    }
}

pub fn percent_to_pixel(pct: f64, container_size: Option<f64>) -> f64 {
    match container_size {
        Some(size) => pct / 100.0 * size,
        None => 0.0,
    }
}

/// Percentage offset of an absolute pixel inside a container starting at `container_start`
pub fn calculate_relative_position(
    absolute_px: f64,
    container_start: f64,
    container_size: Option<f64>,
) -> f64 {
    pixel_to_percent(absolute_px - container_start, container_size)
}

/// Clamp, then keep the point at least `MARGIN` away from every edge
pub fn safe_coordinates(x: Option<f64>, y: Option<f64>) -> (f64, f64) {
    let confine = |v: f64| v.min(MAX_COORDINATE - MARGIN).max(MARGIN);
    (confine(clamp(x)), confine(clamp(y)))
}

/// Convert a top-left percentage position to the PDF origin of an image box.
///
/// `media_box` is `[x, y, width, height]` in points. The returned point is
/// the lower-left corner of a box `height_pt` tall whose top edge sits at
/// `y_pct` percent down the page.
pub fn percent_to_pdf(media_box: [f64; 4], x_pct: f64, y_pct: f64, height_pt: f64) -> (f64, f64) {
    let [origin_x, origin_y, page_width, page_height] = media_box;
    let x = origin_x + x_pct / 100.0 * page_width;
    let y = origin_y + page_height - y_pct / 100.0 * page_height - height_pt;
    (x, y)
}
