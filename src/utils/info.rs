use serde::Serialize;

use crate::decoders::png::frame::FrameInfo;
use crate::decoders::png::header::{AnimationControl, ColorType};

/// Metadata summary of a PNG/APNG stream, as far as it has been read.
#[derive(Debug, Clone, Serialize)]
pub struct PngInfo {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
    pub interlace: bool,
    pub palette_entries: usize,
    pub has_transparency: bool,
    pub gamma: Option<f64>,
    pub animation: Option<AnimationControl>,
    pub repetition_count: i32,
    pub frames: Vec<FrameInfo>,
    pub default_image_hidden: bool,
}
