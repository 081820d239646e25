//! Crop rectangles: repairing model suggestions, aspect-ratio math and
//! fallback crops used when the vision model is unavailable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Smallest side length accepted for a model-suggested crop.
pub const MIN_CROP_SIDE: u32 = 100;

/// Widest output ever produced for a crop (no upscaling beyond this).
pub const MAX_OUTPUT_WIDTH: u32 = 1920;

/// A crop rectangle in source-image pixels, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl CropBox {
    /// Create a new crop box.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the box lies entirely inside a `w`×`h` image.
    pub fn fits_within(&self, w: u32, h: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(w)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(h)
    }

    /// Intersect the box with the image bounds, keeping at least one pixel.
    pub fn clamped_to(&self, w: u32, h: u32) -> Self {
        let w = w.max(1);
        let h = h.max(1);
        let x = self.x.min(w - 1);
        let y = self.y.min(h - 1);
        Self {
            x,
            y,
            width: self.width.clamp(1, w - x),
            height: self.height.clamp(1, h - y),
        }
    }
}

/// Crop parameters as a model returned them, before any repair.
///
/// Models occasionally answer with floats, strings or omit fields entirely,
/// so every coordinate is kept as a float here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawCropBox {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl RawCropBox {
    /// Read a `{x, y, width, height}` object leniently.
    ///
    /// Numbers and numeric strings are accepted. Anything else falls back to
    /// `0` for coordinates and [`MIN_CROP_SIDE`] for sizes.
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str, default: f64| -> f64 {
            let parsed = match value.get(name) {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            // zero counts as missing, so a 0-wide crop becomes the minimum
            match parsed {
                Some(v) if v.is_finite() && v != 0.0 => v,
                _ => default,
            }
        };

        Self {
            x: field("x", 0.0),
            y: field("y", 0.0),
            width: field("width", f64::from(MIN_CROP_SIDE)),
            height: field("height", f64::from(MIN_CROP_SIDE)),
        }
    }

    fn is_integral(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.fract() == 0.0)
    }
}

impl From<CropBox> for RawCropBox {
    fn from(b: CropBox) -> Self {
        Self {
            x: f64::from(b.x),
            y: f64::from(b.y),
            width: f64::from(b.width),
            height: f64::from(b.height),
        }
    }
}

/// A single repair applied by [`validate_and_fix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CropCorrection {
    /// Coordinates were not integers and have been floored
    NonInteger,
    /// Width below the minimum was raised
    WidthTooSmall,
    /// Height below the minimum was raised
    HeightTooSmall,
    /// Negative x moved to 0
    NegativeX,
    /// Negative y moved to 0
    NegativeY,
    /// x left no room for a minimum-width crop
    XOutOfRange,
    /// y left no room for a minimum-height crop
    YOutOfRange,
    /// Right edge overflowed and width was shrunk
    WidthOverflow,
    /// Bottom edge overflowed and height was shrunk
    HeightOverflow,
    /// Repairs could not keep the minimum size, centered default used
    CenteredDefault,
}

impl fmt::Display for CropCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NonInteger => "coordinates must be integers",
            Self::WidthTooSmall => "width must be at least 100 pixels",
            Self::HeightTooSmall => "height must be at least 100 pixels",
            Self::NegativeX => "x must not be negative",
            Self::NegativeY => "y must not be negative",
            Self::XOutOfRange => "x is outside the safe range",
            Self::YOutOfRange => "y is outside the safe range",
            Self::WidthOverflow => "crop width exceeds the image",
            Self::HeightOverflow => "crop height exceeds the image",
            Self::CenteredDefault => "crop still too small after repair, using centered default",
        };
        f.write_str(msg)
    }
}

/// Outcome of [`validate_and_fix`].
#[derive(Debug, Clone, PartialEq)]
pub struct CropFix {
    /// Repaired crop, always inside the image
    pub fixed: CropBox,
    /// Every repair that was needed, in the order applied
    pub corrections: Vec<CropCorrection>,
}

impl CropFix {
    /// True when the suggestion was usable as-is.
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }

    /// Human-readable corrections for the response payload.
    pub fn messages(&self) -> Vec<String> {
        self.corrections.iter().map(ToString::to_string).collect()
    }
}

/// Repair a suggested crop so it fits inside a `width`×`height` image.
pub fn validate_and_fix(raw: RawCropBox, width: u32, height: u32) -> CropFix {
    let mut corrections = Vec::new();
    let img_w = i64::from(width);
    let img_h = i64::from(height);
    let min = i64::from(MIN_CROP_SIDE);

    if !raw.is_integral() {
        corrections.push(CropCorrection::NonInteger);
    }
    let mut x = raw.x.floor() as i64;
    let mut y = raw.y.floor() as i64;
    let mut w = raw.width.floor() as i64;
    let mut h = raw.height.floor() as i64;

    if w < min {
        corrections.push(CropCorrection::WidthTooSmall);
        w = min;
    }
    if h < min {
        corrections.push(CropCorrection::HeightTooSmall);
        h = min;
    }

    if x < 0 {
        corrections.push(CropCorrection::NegativeX);
        x = 0;
    }
    if y < 0 {
        corrections.push(CropCorrection::NegativeY);
        y = 0;
    }
    if x > img_w - min {
        corrections.push(CropCorrection::XOutOfRange);
        x = (img_w - min).max(0);
    }
    if y > img_h - min {
        corrections.push(CropCorrection::YOutOfRange);
        y = (img_h - min).max(0);
    }

    if x.saturating_add(w) > img_w {
        corrections.push(CropCorrection::WidthOverflow);
        w = img_w - x;
    }
    if y.saturating_add(h) > img_h {
        corrections.push(CropCorrection::HeightOverflow);
        h = img_h - y;
    }

    if w < min || h < min {
        corrections.push(CropCorrection::CenteredDefault);
        return CropFix {
            fixed: centered_square(width, height),
            corrections,
        };
    }

    CropFix {
        fixed: CropBox::new(x as u32, y as u32, w as u32, h as u32),
        corrections,
    }
}

/// Centered square covering 80% of the short edge.
fn centered_square(width: u32, height: u32) -> CropBox {
    let short = width.min(height);
    let side = ((f64::from(short) * 0.8).floor() as u32).max(1).min(short);
    CropBox::new((width - side) / 2, (height - side) / 2, side, side)
}

/// Reject a crop that is out of bounds or too small, without repairing it.
pub fn check_strict(b: &CropBox, width: u32, height: u32) -> Result<(), String> {
    if b.width < MIN_CROP_SIDE || b.height < MIN_CROP_SIDE {
        return Err(format!(
            "crop {}x{} is smaller than the {}px minimum",
            b.width, b.height, MIN_CROP_SIDE
        ));
    }
    if !b.fits_within(width, height) {
        return Err(format!(
            "crop ({}, {}, {}x{}) exceeds the {}x{} image",
            b.x, b.y, b.width, b.height, width, height
        ));
    }
    Ok(())
}

/// Strictly read a crop box from model JSON: every field must be a
/// non-negative integer.
pub fn strict_box_from_value(value: &Value) -> Result<CropBox, String> {
    let field = |name: &str| -> Result<u32, String> {
        let n = value
            .get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("crop_params.{} is missing or not a number", name))?;
        if n < 0.0 {
            return Err(format!("crop_params.{} is negative", name));
        }
        if n > f64::from(u32::MAX) {
            return Err(format!("crop_params.{} is too large", name));
        }
        Ok(n.floor() as u32)
    };
    Ok(CropBox::new(
        field("x")?,
        field("y")?,
        field("width")?,
        field("height")?,
    ))
}

/// A target aspect ratio such as `16:9` or `2.35:1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AspectRatio {
    w: f64,
    h: f64,
    label: String,
}

impl AspectRatio {
    /// Width divided by height.
    pub fn value(&self) -> f64 {
        self.w / self.h
    }

    /// The ratio as written by the client, e.g. `"1:1"`.
    pub fn as_str(&self) -> &str {
        &self.label
    }

    /// Square.
    pub fn square() -> Self {
        Self {
            w: 1.0,
            h: 1.0,
            label: "1:1".to_string(),
        }
    }
}

impl FromStr for AspectRatio {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::InvalidInput(format!("invalid aspect ratio '{}'", s));
        let (w, h) = s.trim().split_once(':').ok_or_else(invalid)?;
        let w: f64 = w.trim().parse().map_err(|_| invalid())?;
        let h: f64 = h.trim().parse().map_err(|_| invalid())?;
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(invalid());
        }
        Ok(Self {
            w,
            h,
            label: s.trim().to_string(),
        })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Largest centered crop of `ratio` that fits a `width`×`height` image.
pub fn center_crop_for_ratio(width: u32, height: u32, ratio: &AspectRatio) -> CropBox {
    let target = ratio.value();
    let original = f64::from(width) / f64::from(height.max(1));

    if original > target {
        let crop_h = height;
        let crop_w = ((f64::from(crop_h) * target).floor() as u32).clamp(1, width.max(1));
        CropBox::new((width - crop_w) / 2, 0, crop_w, crop_h)
    } else {
        let crop_w = width;
        let crop_h = ((f64::from(crop_w) / target).floor() as u32).clamp(1, height.max(1));
        CropBox::new(0, (height - crop_h) / 2, crop_w, crop_h)
    }
}

/// Output dimensions for a crop at `ratio`, never larger than the crop itself.
pub fn output_size(b: &CropBox, ratio: &AspectRatio) -> (u32, u32) {
    let r = ratio.value();
    let mut out_w = b.width.min(MAX_OUTPUT_WIDTH);
    let mut out_h = (f64::from(out_w) / r).floor() as u32;
    if out_h > b.height {
        out_h = b.height;
        out_w = ((f64::from(out_h) * r).floor() as u32).min(out_w);
    }
    (out_w.max(1), out_h.max(1))
}

/// Title and description of a crop, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropAnalysis {
    /// Short name for the crop
    #[serde(default)]
    pub title: String,
    /// What the crop does for the picture
    #[serde(default, alias = "effection")]
    pub effect: String,
}

struct Preset {
    title: &'static str,
    effect: &'static str,
    // fractions of width/height: x, y, w, h
    frame: [f64; 4],
}

const FALLBACK_PRESETS: [Preset; 3] = [
    Preset {
        title: "Top space focus",
        effect: "Strengthens the foreground story. Trims distractions above and gives \
                 the lower subject more weight for a clearer near/far contrast.",
        frame: [0.10, 0.15, 0.80, 0.70],
    },
    Preset {
        title: "Tight frame",
        effect: "Brings out the central subject. Cuts distracting edges so the subject \
                 fills the core of the frame and reads more directly.",
        frame: [0.15, 0.10, 0.70, 0.80],
    },
    Preset {
        title: "Balanced framing",
        effect: "Creates a steady visual rhythm. Keeps the subject centered and removes \
                 surplus edges for a tighter, unified picture.",
        frame: [0.20, 0.20, 0.60, 0.60],
    },
];

/// A preset aesthetic crop, used when no model answer is available.
///
/// `seed` picks the preset, so identical uploads get identical fallbacks.
pub fn fallback_crop(width: u32, height: u32, seed: u64) -> (CropAnalysis, CropFix) {
    let preset = &FALLBACK_PRESETS[(seed % FALLBACK_PRESETS.len() as u64) as usize];
    let w = f64::from(width);
    let h = f64::from(height);
    let [fx, fy, fw, fh] = preset.frame;
    let raw = RawCropBox {
        x: (w * fx).floor(),
        y: (h * fy).floor(),
        width: (w * fw).floor(),
        height: (h * fh).floor(),
    };
    (
        CropAnalysis {
            title: preset.title.to_string(),
            effect: preset.effect.to_string(),
        },
        validate_and_fix(raw, width, height),
    )
}
