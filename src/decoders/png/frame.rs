use serde::Serialize;

use crate::decoders::png::header::{BlendOp, DisposeOp, FrameControl, ImageHeader};
use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FrameStatus {
    Empty,
    PartiallyDecoded,
    Complete,
}

/// Placement and timing of a frame on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
    pub delay_num: u16,
    pub delay_den: u16,
    pub dispose: DisposeOp,
    pub blend: BlendOp,
}

impl FrameInfo {
    /// The single frame of a still image.
    pub fn full_canvas(header: &ImageHeader) -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            width: header.width,
            height: header.height,
            delay_num: 0,
            delay_den: 0,
            dispose: DisposeOp::None,
            blend: BlendOp::Source,
        }
    }

    pub fn from_control(fctl: &FrameControl) -> Self {
        Self {
            x_offset: fctl.x_offset,
            y_offset: fctl.y_offset,
            width: fctl.width,
            height: fctl.height,
            delay_num: fctl.delay_num,
            delay_den: fctl.delay_den,
            dispose: fctl.dispose_op,
            blend: fctl.blend_op,
        }
    }

    /// Delay in milliseconds; a zero denominator means hundredths of a second.
    pub fn delay_ms(&self) -> u32 {
        let den = if self.delay_den == 0 { 100 } else { self.delay_den as u32 };
        self.delay_num as u32 * 1000 / den
    }

    pub fn covers(&self, canvas_width: u32, canvas_height: u32) -> bool {
        self.x_offset == 0 && self.y_offset == 0 && self.width == canvas_width && self.height == canvas_height
    }
}

#[derive(Debug, Clone)]
pub struct ImageFrame {
    info: FrameInfo,
    canvas_width: u32,
    canvas_height: u32,
    status: FrameStatus,
    pixels: Option<Vec<u8>>,
    required_previous_frame: Option<usize>,
}

impl ImageFrame {
    fn new(info: FrameInfo, canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            info,
            canvas_width,
            canvas_height,
            status: FrameStatus::Empty,
            pixels: None,
            required_previous_frame: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas_width
    }

    pub fn height(&self) -> u32 {
        self.canvas_height
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == FrameStatus::Complete
    }

    /// Delay before the next frame, in milliseconds.
    pub fn delay(&self) -> u32 {
        self.info.delay_ms()
    }

    /// The composed RGBA8 canvas, or `None` if nothing was allocated yet or it was evicted.
    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }

    pub fn has_pixels(&self) -> bool {
        self.pixels.is_some()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.canvas_width || y >= self.canvas_height {
            return None;
        }

        let start = (y as usize * self.canvas_width as usize + x as usize) * 4;
        let pixels = self.pixels.as_ref()?;
        Some([pixels[start], pixels[start + 1], pixels[start + 2], pixels[start + 3]])
    }

    /// Frame whose pixels this frame was composed over, if any.
    pub fn required_previous_frame(&self) -> Option<usize> {
        self.required_previous_frame
    }

    pub(crate) fn set_required_previous_frame(&mut self, index: Option<usize>) {
        self.required_previous_frame = index;
    }

    pub(crate) fn allocate(&mut self, canvas: Vec<u8>) {
        self.pixels = Some(canvas);
    }

    pub(crate) fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.pixels.as_deref_mut()
    }

    /// Moves the status forward; requests to move it backwards are ignored.
    pub(crate) fn advance_status(&mut self, status: FrameStatus) {
        if status > self.status {
            self.status = status;
        }
    }

    fn evict(&mut self) -> bool {
        if self.status == FrameStatus::Complete && self.pixels.is_some() {
            self.pixels = None;
            true
        } else {
            false
        }
    }
}

/// Frames of one image, indexed in the order their describing chunks arrived.
#[derive(Debug, Default)]
pub struct FrameBufferCache {
    frames: Vec<ImageFrame>,
}

impl FrameBufferCache {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ImageFrame> {
        self.frames.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut ImageFrame> {
        self.frames.get_mut(index)
    }

    pub fn frames(&self) -> &[ImageFrame] {
        &self.frames
    }

    pub(crate) fn push(&mut self, info: FrameInfo, canvas_width: u32, canvas_height: u32) -> usize {
        self.frames.push(ImageFrame::new(info, canvas_width, canvas_height));
        self.frames.len() - 1
    }

    pub fn is_complete_at(&self, index: usize) -> bool {
        self.frames.get(index).map_or(false, ImageFrame::is_complete)
    }

    pub fn is_complete(&self) -> bool {
        !self.frames.is_empty() && self.frames.iter().all(ImageFrame::is_complete)
    }

    /// Drops the pixels of complete frames before `before`, keeping their metadata.
    pub(crate) fn clear_before(&mut self, before: usize) -> usize {
        let end = before.min(self.frames.len());
        let mut cleared = 0;

        for frame in &mut self.frames[..end] {
            if frame.evict() {
                cleared += 1;
            }
        }

        if cleared > 0 {
            log_debug!("Evicted pixels of {} frames before index {}", cleared, before);
        }

        cleared
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }
}
