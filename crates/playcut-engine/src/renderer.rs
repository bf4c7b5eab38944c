// crates/playcut-engine/src/renderer.rs
//
// FrameRenderer: turns the per-clip frame selections of one tick into a
// presented surface. Three cases:
//
//   some layer has a frame          → composite and present
//   no layers exist at all          → true gap: clear to black
//   layers exist but none decoded   → do NOT repaint; the previous frame
//                                     stays up (anti-flicker while an
//                                     under-buffered source catches up)
//
// The skip case is reported so the engine can mark a paused render as still
// owed and retry on the next data arrival.

use playcut_core::compose::{Compositor, Layer};
use playcut_core::frame::FrameHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// Buffering: at least one active video clip but nothing decodable yet.
    Skipped,
}

/// One active video clip's contribution this tick, bottom-to-top order.
pub struct VideoLayer {
    pub opacity: f32,
    /// The selected frame and its timestamp; None while the source buffers.
    pub frame:   Option<(FrameHandle, i64)>,
}

pub struct FrameRenderer {
    compositor: Compositor,
}

impl FrameRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { compositor: Compositor::new(width, height) }
    }

    pub fn surface(&self) -> &[u8] {
        self.compositor.surface()
    }

    pub fn surface_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.compositor.surface_pixel(x, y)
    }

    /// Present one tick. The frame handles in `layers` are render clones;
    /// they are closed (dropped) on return regardless of outcome.
    pub fn render(&mut self, layers: Vec<VideoLayer>) -> RenderOutcome {
        if layers.is_empty() {
            self.compositor.clear_black();
            return RenderOutcome::Rendered;
        }

        let with_frame: Vec<(&FrameHandle, f32)> = layers
            .iter()
            .filter_map(|l| l.frame.as_ref().map(|(h, _)| (h, l.opacity)))
            .collect();

        if with_frame.is_empty() {
            return RenderOutcome::Skipped;
        }

        let stack: Vec<Layer<'_>> = with_frame
            .iter()
            .map(|(handle, opacity)| Layer { frame: handle.as_ref(), opacity: *opacity })
            .collect();
        self.compositor.composite(&stack);
        RenderOutcome::Rendered
    }
}
