//! Drawing helpers for annotated output frames

use std::collections::HashMap;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::DeployError;
use crate::inference::model::BoundingBox;

const PALETTE_SEED: u64 = 42;
const BACKGROUND: &str = "background";
const IMAGE_WEIGHT: f32 = 0.4;
const MASK_WEIGHT: f32 = 0.6;
const LABEL_SCALE: f32 = 16.0;
const LABEL_HEIGHT: u32 = 18;
const BOX_THICKNESS: i32 = 2;

/// Fixed colour per class, reproducible across runs
#[derive(Debug, Clone)]
pub struct ClassPalette {
    colors: Vec<Rgb<u8>>,
    by_name: HashMap<String, usize>,
}

impl ClassPalette {
    /// Seeded random colours, with `background` forced to black
    pub fn new(class_names: &[String]) -> Self {
        let mut rng = StdRng::seed_from_u64(PALETTE_SEED);
        let mut colors = Vec::with_capacity(class_names.len());
        let mut by_name = HashMap::new();

        for (i, name) in class_names.iter().enumerate() {
            let color = Rgb([rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()]);
            if name.eq_ignore_ascii_case(BACKGROUND) {
                colors.push(Rgb([0, 0, 0]));
            } else {
                colors.push(color);
            }
            by_name.insert(name.clone(), i);
        }

        Self { colors, by_name }
    }

    /// Colour of the class at `index`; grey for indices outside the table
    pub fn color(&self, index: usize) -> Rgb<u8> {
        self.colors.get(index).copied().unwrap_or(Rgb([128, 128, 128]))
    }

    pub fn color_for(&self, name: &str) -> Rgb<u8> {
        self.by_name
            .get(name)
            .map(|&i| self.color(i))
            .unwrap_or(Rgb([0, 255, 0]))
    }

    /// Index of the background class, if the table has one
    pub fn background_index(&self) -> Option<usize> {
        self.by_name
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(BACKGROUND))
            .map(|(_, &i)| i)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Font used for box labels
pub struct LabelFont(FontVec);

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let bytes = std::fs::read(path)?;
        let font = FontVec::try_from_vec(bytes).map_err(|e| {
            DeployError::ModelError(format!("Invalid font {}: {}", path.display(), e))
        })?;
        Ok(Self(font))
    }
}

/// A box to draw
pub struct BoxAnnotation<'a> {
    pub bbox: BoundingBox,
    pub label: &'a str,
    pub score: f32,
}

/// Draw labelled boxes for every annotation scoring at least `threshold`
pub fn draw_boxes(
    frame: &mut RgbImage,
    annotations: &[BoxAnnotation<'_>],
    threshold: f32,
    palette: &ClassPalette,
    font: Option<&LabelFont>,
) {
    let (width, height) = frame.dimensions();
    let scale = PxScale::from(LABEL_SCALE);

    for annotation in annotations.iter().filter(|a| a.score >= threshold) {
        let color = palette.color_for(annotation.label);
        let (x, y, w, h) = annotation.bbox.to_pixels(width, height);

        for t in 0..BOX_THICKNESS {
            let (tw, th) = (w.saturating_sub(2 * t as u32), h.saturating_sub(2 * t as u32));
            if tw == 0 || th == 0 {
                break;
            }
            draw_hollow_rect_mut(frame, Rect::at(x + t, y + t).of_size(tw, th), color);
        }

        let text = format!("{}: {:.0}%", annotation.label, annotation.score * 100.0);
        let tab_width = match font {
            Some(LabelFont(font)) => text_size(scale, font, &text).0 + 4,
            None => w.min(LABEL_HEIGHT * 3),
        };
        // keep the tab inside the frame when the box touches the top edge
        let tab_y = if y >= LABEL_HEIGHT as i32 {
            y - LABEL_HEIGHT as i32
        } else {
            y
        };
        draw_filled_rect_mut(
            frame,
            Rect::at(x, tab_y).of_size(tab_width.max(1), LABEL_HEIGHT),
            color,
        );
        if let Some(LabelFont(font)) = font {
            draw_text_mut(frame, contrast(color), x + 2, tab_y + 1, scale, font, &text);
        }
    }
}

/// Blend the class mask over `frame` using the palette.
///
/// Each frame pixel takes the class of its nearest mask cell. With
/// `ignore_background`, background pixels keep the original frame.
pub fn blend_mask(
    frame: &RgbImage,
    mask: &Array2<u32>,
    palette: &ClassPalette,
    ignore_background: bool,
) -> RgbImage {
    let (mask_h, mask_w) = mask.dim();
    let (width, height) = frame.dimensions();
    let background = palette.background_index().map(|i| i as u32);

    let mut out = frame.clone();
    if mask_h == 0 || mask_w == 0 {
        return out;
    }
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let my = y as usize * mask_h / height as usize;
        let mx = x as usize * mask_w / width as usize;
        let class = mask[[my, mx]];
        if ignore_background && Some(class) == background {
            continue;
        }
        let overlay = palette.color(class as usize);
        for c in 0..3 {
            let v = IMAGE_WEIGHT * pixel.0[c] as f32 + MASK_WEIGHT * overlay.0[c] as f32;
            pixel.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn contrast(color: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = color.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 140.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}
