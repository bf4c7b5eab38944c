// crates/playcut-core/src/frame.rs
//
// Decoded RGBA frame data and the refcounted handle the rest of the engine
// passes around. A FrameBuffer holds one reference per queued frame; every
// render takes a clone and drops it when the pixels have been composited.
// "Closing" a frame is dropping the last handle.

use std::sync::Arc;

/// One decoded frame, tightly packed RGBA (no stride padding).
#[derive(Clone, Debug, PartialEq)]
pub struct RgbaFrame {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            (width * height * 4) as usize,
            "RgbaFrame: data length {} ≠ {}×{}×4",
            data.len(), width, height
        );
        Self { width, height, data }
    }

    /// A solid-color frame. Test fixtures and the black gap fill use this.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Refcounted handle to a decoded frame.
///
/// `Arc::strong_count` is the live-reference count the frame-lifetime tests
/// observe: exactly one count per buffer slot plus one per in-flight render.
pub type FrameHandle = Arc<RgbaFrame>;
