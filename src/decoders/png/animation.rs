use crate::decoders::png::frame::{FrameBufferCache, FrameInfo};
use crate::decoders::png::header::{AnimationControl, BlendOp, DisposeOp};
use crate::decoders::png::scanline::DecodedRow;
use crate::log_warn;
use crate::utils::error::{PngError, PngResult};

/// Loop count reported for an animation that repeats forever, and for still images.
pub const ANIMATION_LOOP_INFINITE: i32 = -1;

/// Per-stream APNG bookkeeping: the acTL declaration and fcTL/fdAT ordering.
#[derive(Debug, Clone, Default)]
pub struct AnimationController {
    control: Option<AnimationControl>,
    next_sequence: u32,
    frames_described: usize,
}

impl AnimationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_animated(&self) -> bool {
        self.control.is_some()
    }

    pub fn control(&self) -> Option<AnimationControl> {
        self.control
    }

    pub fn frames_described(&self) -> usize {
        self.frames_described
    }

    /// Accepts an acTL chunk; returns false when it has to be ignored.
    pub fn accept_control(&mut self, control: AnimationControl) -> bool {
        if self.control.is_some() {
            log_warn!("Duplicate acTL chunk, ignoring");
            return false;
        }

        if control.num_frames == 0 {
            log_warn!("acTL chunk with zero frames, treating image as not animated");
            return false;
        }

        self.control = Some(control);
        true
    }

    /// Consumes the sequence number of an fcTL or fdAT chunk.
    pub fn check_sequence(&mut self, sequence_number: u32) -> PngResult<()> {
        if sequence_number != self.next_sequence {
            return Err(PngError::SequenceNumber {
                expected: self.next_sequence,
                found: sequence_number,
            });
        }

        self.next_sequence = self
            .next_sequence
            .checked_add(1)
            .ok_or_else(|| PngError::Custom("animation sequence number overflow".to_string()))?;

        Ok(())
    }

    /// Registers a new fcTL and returns the frame index it describes.
    pub fn describe_frame(&mut self) -> PngResult<usize> {
        let declared = self.control.map_or(0, |control| control.num_frames as usize);

        if self.frames_described >= declared {
            return Err(PngError::FrameIndex(format!(
                "fcTL for frame {} but acTL declares {} frames",
                self.frames_described, declared
            )));
        }

        self.frames_described += 1;
        Ok(self.frames_described - 1)
    }
}

/// Converts an acTL play count into the loop count reported to callers.
pub fn repetition_count(play_count: u32) -> i32 {
    i32::try_from(play_count).map_or(i32::MAX - 1, |count| count - 1)
}

/// Finds the frame whose pixels frame `index` has to be composed over.
///
/// Frames disposed with Previous are skipped, and no predecessor is needed when the
/// canvas would be fully transparent or fully overwritten anyway.
pub fn required_previous_frame(cache: &FrameBufferCache, index: usize) -> Option<usize> {
    if index == 0 {
        return None;
    }

    let current = cache.get(index)?;
    let (canvas_width, canvas_height) = (current.width(), current.height());

    if current.info().blend == BlendOp::Source && current.info().covers(canvas_width, canvas_height) {
        return None;
    }

    let mut previous = index - 1;

    loop {
        let info = cache.get(previous)?.info();

        match info.dispose {
            DisposeOp::None => return Some(previous),
            DisposeOp::Background => {
                if info.covers(canvas_width, canvas_height) {
                    return None;
                }
                return Some(previous);
            }
            DisposeOp::Previous => {
                if previous == 0 {
                    return None;
                }
                previous -= 1;
            }
        }
    }
}

/// Builds the canvas a frame starts from: its required predecessor with that
/// predecessor's disposal applied, or a transparent canvas.
pub fn initial_canvas(cache: &FrameBufferCache, required: Option<usize>, width: u32, height: u32) -> PngResult<Vec<u8>> {
    let size = width as usize * height as usize * 4;

    let Some(required) = required else {
        return Ok(vec![0; size]);
    };

    let frame = cache
        .get(required)
        .ok_or_else(|| PngError::FrameIndex(format!("required frame {} is unknown", required)))?;

    if !frame.is_complete() {
        return Err(PngError::FrameIndex(format!("required frame {} is not complete", required)));
    }

    let mut canvas = frame
        .pixels()
        .ok_or_else(|| PngError::FrameIndex(format!("required frame {} has no pixels", required)))?
        .to_vec();

    if frame.info().dispose == DisposeOp::Background {
        clear_rect(&mut canvas, width, frame.info());
    }

    Ok(canvas)
}

fn clear_rect(canvas: &mut [u8], canvas_width: u32, info: &FrameInfo) {
    for y in info.y_offset..info.y_offset + info.height {
        let row_start = (y as usize * canvas_width as usize + info.x_offset as usize) * 4;
        let row_end = row_start + info.width as usize * 4;

        if let Some(row) = canvas.get_mut(row_start..row_end) {
            row.fill(0);
        }
    }
}

#[inline]
fn div255(value: u32) -> u32 {
    (value + 127) / 255
}

fn blend_over(dst: &mut [u8], src: &[u8], premultiplied: bool) {
    let sa = src[3] as u32;

    if sa == 255 {
        dst.copy_from_slice(src);
        return;
    }

    if sa == 0 {
        return;
    }

    let inv = 255 - sa;

    if premultiplied {
        for i in 0..4 {
            dst[i] = (src[i] as u32 + div255(dst[i] as u32 * inv)).min(255) as u8;
        }
        return;
    }

    let da = div255(dst[3] as u32 * inv);
    let out_a = sa + da;

    for i in 0..3 {
        let mixed = src[i] as u32 * sa + dst[i] as u32 * da;
        dst[i] = ((mixed + out_a / 2) / out_a).min(255) as u8;
    }
    dst[3] = out_a.min(255) as u8;
}

/// Draws one decoded row of a frame onto its canvas with the frame's blend operator.
pub fn blend_row(canvas: &mut [u8], canvas_width: u32, info: &FrameInfo, row: &DecodedRow, premultiplied: bool) -> PngResult<()> {
    let y = (info.y_offset + row.y) as usize;

    for (n, src) in row.pixels.chunks_exact(4).enumerate() {
        let x = (info.x_offset + row.x_start + n as u32 * row.x_step) as usize;
        let start = (y * canvas_width as usize + x) * 4;
        let len = canvas.len();

        let dst = canvas.get_mut(start..start + 4).ok_or(PngError::OutOfBounds {
            start,
            end: start + 4,
            len,
        })?;

        match info.blend {
            BlendOp::Source => dst.copy_from_slice(src),
            BlendOp::Over => blend_over(dst, src, premultiplied),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(x: u32, y: u32, w: u32, h: u32, dispose: DisposeOp, blend: BlendOp) -> FrameInfo {
        FrameInfo {
            x_offset: x,
            y_offset: y,
            width: w,
            height: h,
            delay_num: 0,
            delay_den: 0,
            dispose,
            blend,
        }
    }

    #[test]
    fn sequence_numbers_must_be_consecutive() {
        let mut controller = AnimationController::new();
        controller.check_sequence(0).unwrap();
        controller.check_sequence(1).unwrap();

        assert!(matches!(
            controller.check_sequence(1),
            Err(PngError::SequenceNumber { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn frames_beyond_declaration_are_rejected() {
        let mut controller = AnimationController::new();
        assert!(controller.accept_control(AnimationControl { num_frames: 1, num_plays: 0 }));
        assert_eq!(controller.describe_frame().unwrap(), 0);
        assert!(controller.describe_frame().is_err());
    }

    #[test]
    fn repetition_count_is_plays_minus_one() {
        assert_eq!(repetition_count(0), ANIMATION_LOOP_INFINITE);
        assert_eq!(repetition_count(3), 2);
        assert_eq!(repetition_count(u32::MAX), i32::MAX - 1);
    }

    #[test]
    fn previous_disposal_skips_back() {
        let mut cache = FrameBufferCache::new();
        cache.push(info(0, 0, 4, 4, DisposeOp::None, BlendOp::Source), 4, 4);
        cache.push(info(1, 1, 2, 2, DisposeOp::Previous, BlendOp::Over), 4, 4);
        cache.push(info(0, 0, 1, 1, DisposeOp::None, BlendOp::Over), 4, 4);
        cache.push(info(0, 0, 4, 4, DisposeOp::None, BlendOp::Source), 4, 4);

        assert_eq!(required_previous_frame(&cache, 0), None);
        assert_eq!(required_previous_frame(&cache, 1), Some(0));
        assert_eq!(required_previous_frame(&cache, 2), Some(0));
        assert_eq!(required_previous_frame(&cache, 3), None);
    }

    #[test]
    fn straight_over_blend() {
        let mut dst = [0, 0, 255, 255];
        blend_over(&mut dst, &[255, 0, 0, 128], false);
        assert_eq!(dst, [128, 0, 127, 255]);

        let mut empty = [0, 0, 0, 0];
        blend_over(&mut empty, &[10, 20, 30, 40], false);
        assert_eq!(empty, [10, 20, 30, 40]);
    }

    #[test]
    fn background_disposal_clears_only_its_rect() {
        let mut cache = FrameBufferCache::new();
        let index = cache.push(info(1, 0, 1, 1, DisposeOp::Background, BlendOp::Source), 2, 1);
        let frame = cache.get_mut(index).unwrap();
        frame.allocate(vec![9; 8]);
        frame.advance_status(crate::decoders::png::frame::FrameStatus::Complete);

        let canvas = initial_canvas(&cache, Some(0), 2, 1).unwrap();
        assert_eq!(canvas, vec![9, 9, 9, 9, 0, 0, 0, 0]);
    }
}
