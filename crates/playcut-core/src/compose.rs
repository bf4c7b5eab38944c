// crates/playcut-core/src/compose.rs
//
// Layer compositing onto the display surface.
//
// The blend runs in gamma-encoded byte space — a correct approximation for
// SDR content; for linear-light accuracy convert to f32, blend, convert back.
// Layers arrive bottom-to-top; the base layer is copied at full weight and
// every subsequent layer is mixed in with weight `alpha × opacity`.

use rayon::prelude::*;

use crate::frame::RgbaFrame;

/// One video layer queued for compositing this tick.
pub struct Layer<'a> {
    pub frame:   &'a RgbaFrame,
    /// Clip opacity in [0, 1]; multiplies the frame's own alpha channel.
    pub opacity: f32,
}

/// Mix one gamma-encoded byte into a base byte at `weight` ∈ [0, 1].
#[inline]
pub fn blend_byte(base: u8, overlay: u8, weight: f32) -> u8 {
    (overlay as f32 * weight + base as f32 * (1.0 - weight)).round() as u8
}

// ── Compositor ────────────────────────────────────────────────────────────────

/// Owns the display surface and composites layer stacks into it.
///
/// The surface is a fixed-size RGBA buffer whose content is overwritten
/// every presented frame. Layers whose dimensions differ from the surface
/// are nearest-neighbor sampled — scaling policy belongs to the decoders,
/// this is only a safety net for mid-stream dimension changes.
pub struct Compositor {
    width:   u32,
    height:  u32,
    surface: Vec<u8>,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            surface: vec![0; (width * height * 4) as usize],
        }
    }

    #[inline]
    pub fn width(&self) -> u32 { self.width }

    #[inline]
    pub fn height(&self) -> u32 { self.height }

    /// The last presented pixels.
    pub fn surface(&self) -> &[u8] {
        &self.surface
    }

    #[inline]
    pub fn surface_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.surface[i],
            self.surface[i + 1],
            self.surface[i + 2],
            self.surface[i + 3],
        ]
    }

    /// Fill the surface with opaque black. Used for true gaps in the
    /// composition (no active video clip at all).
    pub fn clear_black(&mut self) {
        self.surface
            .chunks_exact_mut(4)
            .for_each(|px| px.copy_from_slice(&[0, 0, 0, 255]));
    }

    /// Composite `layers` bottom-to-top into the surface.
    ///
    /// The bottom layer is written at full weight; each subsequent layer
    /// blends with `out = over·w + base·(1−w)` where
    /// `w = overlay_alpha × opacity`, and `out.a = max(base.a, w)`.
    pub fn composite(&mut self, layers: &[Layer<'_>]) {
        let Some((base, overlays)) = layers.split_first() else {
            return;
        };

        let w = self.width;
        let h = self.height;

        // Base layer: straight copy (nearest-sampled if dimensions differ).
        let base_frame = base.frame;
        self.surface
            .par_chunks_exact_mut((w * 4) as usize)
            .enumerate()
            .for_each(|(y, row)| {
                copy_row_nearest(row, base_frame, y as u32, w, h);
            });

        for layer in overlays {
            let frame = layer.frame;
            let opacity = layer.opacity.clamp(0.0, 1.0);
            if opacity == 0.0 {
                continue;
            }
            self.surface
                .par_chunks_exact_mut((w * 4) as usize)
                .enumerate()
                .for_each(|(y, row)| {
                    blend_row_nearest(row, frame, opacity, y as u32, w, h);
                });
        }
    }
}

/// Copy one surface row from `frame`, nearest-sampling when sizes differ.
fn copy_row_nearest(row: &mut [u8], frame: &RgbaFrame, y: u32, out_w: u32, out_h: u32) {
    if frame.width == out_w && frame.height == out_h {
        let start = (y * frame.width * 4) as usize;
        row.copy_from_slice(&frame.data[start..start + (out_w * 4) as usize]);
        return;
    }
    let sy = (y as u64 * frame.height as u64 / out_h as u64) as u32;
    for x in 0..out_w {
        let sx = (x as u64 * frame.width as u64 / out_w as u64) as u32;
        let src = ((sy * frame.width + sx) * 4) as usize;
        let dst = (x * 4) as usize;
        row[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
    }
}

/// Blend one surface row with `frame` at `opacity`.
fn blend_row_nearest(row: &mut [u8], frame: &RgbaFrame, opacity: f32, y: u32, out_w: u32, out_h: u32) {
    let sy = if frame.height == out_h {
        y
    } else {
        (y as u64 * frame.height as u64 / out_h as u64) as u32
    };
    for x in 0..out_w {
        let sx = if frame.width == out_w {
            x
        } else {
            (x as u64 * frame.width as u64 / out_w as u64) as u32
        };
        let src = ((sy * frame.width + sx) * 4) as usize;
        let dst = (x * 4) as usize;

        let overlay_a = frame.data[src + 3] as f32 / 255.0;
        let weight = overlay_a * opacity;
        for c in 0..3 {
            row[dst + c] = blend_byte(row[dst + c], frame.data[src + c], weight);
        }
        let blended_a = (weight * 255.0).round() as u8;
        row[dst + 3] = row[dst + 3].max(blended_a);
    }
}
