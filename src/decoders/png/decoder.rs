use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::decoders::png::animation::{
    blend_row, initial_canvas, repetition_count, required_previous_frame, ANIMATION_LOOP_INFINITE,
};
use crate::decoders::png::frame::{FrameBufferCache, FrameInfo, FrameStatus, ImageFrame};
use crate::decoders::png::header::{AnimationControl, ImageHeader};
use crate::decoders::png::scanline::DecodedRow;
use crate::decoders::png::session::{DecodeSession, FramePlan, StepOutcome, StreamFacts};
use crate::decoders::png::state::{transition, DecodeState, Effect};
use crate::utils::error::{PngError, PngResult};
use crate::utils::info::PngInfo;
use crate::utils::options::DecoderOptions;
use crate::{log_debug, log_error, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Size,
    AfterFrame(usize),
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Halted,
    NeedMore,
    Ended,
    Collapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Collapse,
}

/// Incremental PNG/APNG decoder.
///
/// Bytes are appended as they arrive and decoding runs lazily, on the calling
/// thread, when a size or frame is requested. Missing data simply halts decoding
/// at the last complete chunk; the next request picks up where it stopped.
///
/// The whole byte stream is retained so that evicted frames can be decoded again.
pub struct PngImageDecoder {
    options: DecoderOptions,
    data: Vec<u8>,
    all_data_received: bool,
    session: Option<Box<DecodeSession>>,
    scan: Option<Box<DecodeSession>>,
    header: Option<ImageHeader>,
    size: Option<(u32, u32)>,
    cache: FrameBufferCache,
    animation: Option<AnimationControl>,
    facts: StreamFacts,
    ignore_animation: bool,
    failed: bool,
    last_error: Option<PngError>,
}

impl Default for PngImageDecoder {
    fn default() -> Self {
        Self::new(DecoderOptions::default())
    }
}

impl PngImageDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            options,
            data: Vec::new(),
            all_data_received: false,
            session: None,
            scan: None,
            header: None,
            size: None,
            cache: FrameBufferCache::new(),
            animation: None,
            facts: StreamFacts::default(),
            ignore_animation: false,
            failed: false,
            last_error: None,
        }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    pub fn filename_extension(&self) -> &'static str {
        "png"
    }

    pub fn append_data(&mut self, bytes: &[u8]) {
        if self.all_data_received {
            log_warn!("{} bytes appended after all data was received", bytes.len());
        }

        self.data.extend_from_slice(bytes);
    }

    /// Replaces the stream with `bytes`, which must start with everything received so far.
    pub fn set_data(&mut self, bytes: &[u8], all_data_received: bool) {
        if !bytes.starts_with(&self.data) {
            self.fail(PngError::Custom(
                "new data does not extend the bytes already received".to_string(),
            ));
            return;
        }

        let known = self.data.len();
        self.data.extend_from_slice(&bytes[known..]);
        self.all_data_received = all_data_received;
    }

    pub fn set_all_data_received(&mut self) {
        self.all_data_received = true;
    }

    pub fn is_all_data_received(&self) -> bool {
        self.all_data_received
    }

    /// Decodes just far enough to learn the image size.
    pub fn is_size_available(&mut self) -> bool {
        if self.failed {
            return false;
        }

        if self.header.is_none() {
            self.decode(Halt::Size);
        }

        !self.failed && self.header.is_some()
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// Records the canvas size. A second call with different dimensions, or a canvas
    /// above `max_decoded_bytes`, fails the decoder and returns false.
    pub fn set_size(&mut self, width: u32, height: u32) -> bool {
        match self.apply_size(width, height) {
            Ok(()) => true,
            Err(error) => {
                self.fail(error);
                false
            }
        }
    }

    /// Number of frames discovered so far; never decreases and is at least 1.
    pub fn frame_count(&mut self) -> usize {
        self.scan_frames();
        self.cache.len().max(1)
    }

    /// Animation loop count: declared plays minus one, or -1 for infinite loops and still images.
    pub fn repetition_count(&mut self) -> i32 {
        self.scan_frames();

        match self.animation {
            Some(control) => repetition_count(control.num_plays),
            None => ANIMATION_LOOP_INFINITE,
        }
    }

    pub fn frame_delay_at_index(&mut self, index: usize) -> Option<u32> {
        self.scan_frames();
        self.cache.get(index).map(ImageFrame::delay)
    }

    /// Decodes up to and including frame `index` and returns it.
    ///
    /// The frame may still be partially decoded if its data has not fully arrived.
    /// Frames whose pixels were evicted are decoded again from the retained stream.
    pub fn frame_buffer_at_index(&mut self, index: usize) -> Option<&ImageFrame> {
        if !self.failed {
            let evicted = self
                .cache
                .get(index)
                .map_or(false, |frame| frame.is_complete() && !frame.has_pixels());

            if evicted {
                if let Err(error) = self.redecode_frame(index) {
                    self.fail(error);
                }
            } else if !self.cache.is_complete_at(index) {
                self.decode(Halt::AfterFrame(index));
            }
        }

        self.cache.get(index)
    }

    pub fn is_complete_at_index(&self, index: usize) -> bool {
        self.cache.is_complete_at(index)
    }

    /// True once IEND was reached and every frame is complete.
    pub fn is_complete(&self) -> bool {
        let reached_end = [&self.session, &self.scan]
            .iter()
            .any(|session| session.as_ref().map_or(false, |session| session.state() == DecodeState::Complete));

        !self.failed && reached_end && self.cache.is_complete()
    }

    /// Drops the pixels of complete frames before `before` and returns how many were dropped.
    pub fn clear_frame_buffer_cache(&mut self, before: usize) -> usize {
        self.cache.clear_before(before)
    }

    pub fn frame_cache(&self) -> &FrameBufferCache {
        &self.cache
    }

    pub fn state(&self) -> DecodeState {
        if self.failed {
            return DecodeState::Failed;
        }

        self.session
            .as_ref()
            .map_or(DecodeState::AwaitingHeader, |session| session.state())
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn last_error(&self) -> Option<&PngError> {
        self.last_error.as_ref()
    }

    /// Marks the decoder failed and tears down its codec context. Always returns false.
    pub fn set_failed(&mut self) -> bool {
        self.session = None;
        self.scan = None;
        self.failed = true;
        false
    }

    /// Forgets everything decoded so far; the retained bytes are decoded again on demand.
    pub fn reset(&mut self) {
        log_debug!("Resetting decoder with {} bytes retained", self.data.len());

        self.session = None;
        self.scan = None;
        self.header = None;
        self.size = None;
        self.cache.clear();
        self.animation = None;
        self.facts = StreamFacts::default();
        self.ignore_animation = false;
        self.failed = false;
        self.last_error = None;
    }

    pub fn get_info(&self) -> Option<PngInfo> {
        let header = self.header?;

        Some(PngInfo {
            width: header.width,
            height: header.height,
            bit_depth: header.bit_depth,
            color_type: header.color_type,
            interlace: header.interlace,
            palette_entries: self.facts.palette_entries,
            has_transparency: self.facts.has_transparency,
            gamma: self.facts.gamma,
            animation: self.animation,
            repetition_count: self
                .animation
                .map_or(ANIMATION_LOOP_INFINITE, |control| repetition_count(control.num_plays)),
            frames: self.cache.frames().iter().map(|frame| *frame.info()).collect(),
            default_image_hidden: self.facts.default_image_hidden,
        })
    }

    fn new_session(&self, plan: FramePlan) -> DecodeSession {
        DecodeSession::new(&self.options, plan, self.ignore_animation)
    }

    /// The codec context is gone once the decoder has failed.
    fn ensure_alive(&self) -> PngResult<()> {
        if self.failed {
            return Err(PngError::DecoderFailed);
        }
        Ok(())
    }

    fn decode(&mut self, halt: Halt) {
        while self.ensure_alive().is_ok() {
            let mut session = match self.session.take() {
                Some(session) => session,
                None => Box::new(self.new_session(FramePlan::All)),
            };

            match self.run(&mut session, halt) {
                Ok(RunOutcome::Collapsed) => self.collapse_to_static(),
                Ok(_) => {
                    self.session = Some(session);
                    return;
                }
                Err(error) => {
                    self.fail(error);
                    return;
                }
            }
        }
    }

    /// Walks the available data for frame metadata without inflating anything.
    fn scan_frames(&mut self) {
        while self.ensure_alive().is_ok() {
            let mut scan = match self.scan.take() {
                Some(scan) => scan,
                None => Box::new(self.new_session(FramePlan::scan())),
            };

            match self.run(&mut scan, Halt::Never) {
                Ok(RunOutcome::Collapsed) => self.collapse_to_static(),
                Ok(_) => {
                    self.scan = Some(scan);
                    return;
                }
                Err(error) => {
                    self.fail(error);
                    return;
                }
            }
        }
    }

    /// Restores the pixels of an evicted frame, starting from the nearest frame in its
    /// dependency chain that still has pixels.
    fn redecode_frame(&mut self, target: usize) -> PngResult<()> {
        self.ensure_alive()?;

        let mut plan = BTreeSet::new();
        let mut next = Some(target);

        while let Some(index) = next {
            let frame = self
                .cache
                .get(index)
                .ok_or_else(|| PngError::FrameIndex(format!("frame {} is unknown", index)))?;

            if frame.has_pixels() {
                break;
            }

            plan.insert(index);
            next = frame.required_previous_frame();
        }

        log_debug!("Redecoding frame {} via frames {:?}", target, plan);

        let mut replay = self.new_session(FramePlan::Only(plan));

        match self.run(&mut replay, Halt::AfterFrame(target))? {
            RunOutcome::Halted => Ok(()),
            outcome => Err(PngError::FrameIndex(format!(
                "frame {} could not be redecoded ({:?})",
                target, outcome
            ))),
        }
    }

    fn halt_reached(&self, session: &DecodeSession, halt: Halt) -> bool {
        match halt {
            Halt::Size => self.header.is_some(),
            Halt::AfterFrame(index) => session.has_completed(index),
            Halt::Never => false,
        }
    }

    fn run(&mut self, session: &mut DecodeSession, halt: Halt) -> PngResult<RunOutcome> {
        let mut events = Vec::new();

        loop {
            if self.halt_reached(session, halt) {
                return Ok(RunOutcome::Halted);
            }

            let step = session.step(&self.data, self.all_data_received, &mut events)?;
            self.facts.absorb(session.facts());

            for event in events.drain(..) {
                let (next, effects) = transition(session.state(), event);
                session.set_state(next);

                for effect in effects {
                    if self.apply(effect)? == Flow::Collapse {
                        return Ok(RunOutcome::Collapsed);
                    }
                }
            }

            match step {
                StepOutcome::NeedMore => return Ok(RunOutcome::NeedMore),
                StepOutcome::Ended => return Ok(RunOutcome::Ended),
                StepOutcome::Advanced => {}
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> PngResult<Flow> {
        match effect {
            Effect::SizeAvailable(header) => self.accept_header(header)?,
            Effect::RecordAnimation(control) => self.record_animation(control)?,
            Effect::RegisterFrame { index, info } => self.register_frame(index, info)?,
            Effect::AllocateFrame(index) => self.initialize_frame(index)?,
            Effect::WriteRow { index, row } => self.write_row(index, &row)?,
            Effect::CompleteFrame(index) => self.complete_frame(index)?,
            Effect::CollapseToStatic => return Ok(Flow::Collapse),
            Effect::Fail(error) => return Err(error),
        }

        Ok(Flow::Continue)
    }

    fn apply_size(&mut self, width: u32, height: u32) -> PngResult<()> {
        if let Some((known_width, known_height)) = self.size {
            if (known_width, known_height) != (width, height) {
                return Err(PngError::SizeMismatch {
                    width: known_width,
                    height: known_height,
                    new_width: width,
                    new_height: height,
                });
            }
            return Ok(());
        }

        let bytes = width as u64 * height as u64 * 4;
        if bytes > self.options.max_decoded_bytes {
            return Err(PngError::ImageTooLarge {
                width,
                height,
                limit: self.options.max_decoded_bytes,
            });
        }

        self.size = Some((width, height));
        Ok(())
    }

    fn accept_header(&mut self, header: ImageHeader) -> PngResult<()> {
        match self.header {
            Some(known) if known != header => Err(PngError::CorruptImageData(
                "IHDR differs between passes over the stream".to_string(),
            )),
            Some(_) => Ok(()),
            None => {
                self.header = Some(header);
                self.apply_size(header.width, header.height)
            }
        }
    }

    fn record_animation(&mut self, control: AnimationControl) -> PngResult<()> {
        match self.animation {
            Some(known) if known != control => Err(PngError::CorruptImageData(
                "acTL differs between passes over the stream".to_string(),
            )),
            _ => {
                self.animation = Some(control);
                Ok(())
            }
        }
    }

    fn register_frame(&mut self, index: usize, info: FrameInfo) -> PngResult<()> {
        let header = self
            .header
            .ok_or_else(|| PngError::ChunkOrdering("frame described before IHDR".to_string()))?;

        match index.cmp(&self.cache.len()) {
            Ordering::Less => {
                let known = self.cache.get(index).map(|frame| *frame.info());
                if known != Some(info) {
                    return Err(PngError::FrameIndex(format!(
                        "metadata of frame {} changed between passes",
                        index
                    )));
                }
                Ok(())
            }
            Ordering::Equal => {
                self.cache.push(info, header.width, header.height);
                log_debug!(
                    "Frame {} registered: {}x{}+{}+{} {:?}/{:?}",
                    index,
                    info.width,
                    info.height,
                    info.x_offset,
                    info.y_offset,
                    info.dispose,
                    info.blend
                );
                Ok(())
            }
            Ordering::Greater => Err(PngError::FrameIndex(format!(
                "frame {} described while only {} frames are known",
                index,
                self.cache.len()
            ))),
        }
    }

    fn initialize_frame(&mut self, index: usize) -> PngResult<()> {
        let (width, height) = self
            .size
            .ok_or_else(|| PngError::ChunkOrdering("frame data before the image size".to_string()))?;

        let required = required_previous_frame(&self.cache, index);

        if let Some(required) = required {
            let frame = self
                .cache
                .get(required)
                .ok_or_else(|| PngError::FrameIndex(format!("frame {} is unknown", required)))?;

            if !frame.is_complete() {
                return Err(PngError::FrameIndex(format!(
                    "frame {} started before frame {} was complete",
                    index, required
                )));
            }

            if !frame.has_pixels() {
                self.redecode_frame(required)?;
            }
        }

        let canvas = initial_canvas(&self.cache, required, width, height)?;
        let frame = self
            .cache
            .get_mut(index)
            .ok_or_else(|| PngError::FrameIndex(format!("rows for unregistered frame {}", index)))?;

        frame.set_required_previous_frame(required);
        frame.allocate(canvas);

        log_debug!("Frame {} allocated over {:?}", index, required);
        Ok(())
    }

    fn write_row(&mut self, index: usize, row: &DecodedRow) -> PngResult<()> {
        let premultiplied = self.options.premultiply();
        let frame = self
            .cache
            .get_mut(index)
            .ok_or_else(|| PngError::FrameIndex(format!("rows for unregistered frame {}", index)))?;

        let info = *frame.info();
        let width = frame.width();
        let canvas = frame
            .pixels_mut()
            .ok_or_else(|| PngError::FrameIndex(format!("frame {} has no canvas", index)))?;

        blend_row(canvas, width, &info, row, premultiplied)?;
        frame.advance_status(FrameStatus::PartiallyDecoded);

        Ok(())
    }

    fn complete_frame(&mut self, index: usize) -> PngResult<()> {
        let frame = self
            .cache
            .get_mut(index)
            .ok_or_else(|| PngError::FrameIndex(format!("completion of unregistered frame {}", index)))?;

        frame.advance_status(FrameStatus::Complete);
        log_debug!("Frame {} complete", index);
        Ok(())
    }

    fn collapse_to_static(&mut self) {
        log_warn!("Discarding animation, presenting the default image as a still frame");

        self.ignore_animation = true;
        self.animation = None;
        self.cache.clear();
        self.facts = StreamFacts::default();
        self.session = None;
        self.scan = None;
    }

    /// Single failure path. The first error is kept as `last_error`.
    fn fail(&mut self, error: PngError) {
        log_error!("PNG decoding failed: {}", error);

        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
        self.set_failed();
    }
}
