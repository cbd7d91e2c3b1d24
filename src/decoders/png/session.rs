use std::collections::BTreeSet;

use crate::decoders::png::animation::AnimationController;
use crate::decoders::png::chunk::{ChunkHeader, ChunkReader, ChunkStatus, ChunkType};
use crate::decoders::png::frame::FrameInfo;
use crate::decoders::png::header::{
    gamma_table, parse_gamma, AnimationControl, ColorLayers, ColorType, FrameControl, ImageHeader, Palette,
    Transparency,
};
use crate::decoders::png::scanline::{PixelConverter, ScanlineDecoder};
use crate::decoders::png::state::{CodecEvent, DecodeState};
use crate::utils::error::{PngError, PngResult};
use crate::utils::options::DecoderOptions;
use crate::utils::traits::{BigEndianFields, SafeAccess};
use crate::{log_debug, log_info, log_warn};

/// Which frames a session inflates. Frames outside the plan are still discovered
/// and sequence-checked, but their compressed data is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FramePlan {
    All,
    Only(BTreeSet<usize>),
}

impl FramePlan {
    /// Discovers frames without decoding any of them.
    pub fn scan() -> Self {
        FramePlan::Only(BTreeSet::new())
    }

    fn includes(&self, index: usize) -> bool {
        match self {
            FramePlan::All => true,
            FramePlan::Only(frames) => frames.contains(&index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    NeedMore,
    Advanced,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataSource {
    Idat,
    Fdat,
}

/// Stream properties that do not flow through codec events.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct StreamFacts {
    pub palette_entries: usize,
    pub has_transparency: bool,
    pub gamma: Option<f64>,
    pub default_image_hidden: bool,
}

impl StreamFacts {
    /// Merges what another pass over the same stream has learned so far.
    pub fn absorb(&mut self, other: StreamFacts) {
        self.palette_entries = self.palette_entries.max(other.palette_entries);
        self.has_transparency |= other.has_transparency;
        self.default_image_hidden |= other.default_image_hidden;

        if other.gamma.is_some() {
            self.gamma = other.gamma;
        }
    }
}

struct ActiveFrame {
    index: usize,
    source: DataSource,
    // None when the plan skips this frame.
    decoder: Option<ScanlineDecoder>,
    reported_complete: bool,
}

struct PendingFrame {
    index: usize,
    info: FrameInfo,
    source: DataSource,
}

/// One pass over the retained byte stream: chunk reader offset, inflate state
/// and partial scanlines all live here and persist across calls.
pub(crate) struct DecodeSession {
    reader: ChunkReader,
    options: DecoderOptions,
    plan: FramePlan,
    ignore_animation: bool,
    state: DecodeState,
    header: Option<ImageHeader>,
    colors: ColorLayers,
    gamma: Option<[u8; 256]>,
    facts: StreamFacts,
    animation: AnimationController,
    pending: Option<PendingFrame>,
    active: Option<ActiveFrame>,
    highest_completed: Option<usize>,
    seen_idat: bool,
    seen_fdat: bool,
    last_was_idat: bool,
    ended: bool,
}

impl DecodeSession {
    pub fn new(options: &DecoderOptions, plan: FramePlan, ignore_animation: bool) -> Self {
        Self {
            reader: ChunkReader::new(options),
            options: options.clone(),
            plan,
            ignore_animation,
            state: DecodeState::AwaitingHeader,
            header: None,
            colors: ColorLayers::default(),
            gamma: None,
            facts: StreamFacts::default(),
            animation: AnimationController::new(),
            pending: None,
            active: None,
            highest_completed: None,
            seen_idat: false,
            seen_fdat: false,
            last_was_idat: false,
            ended: false,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn set_state(&mut self, state: DecodeState) {
        self.state = state;
    }

    pub fn facts(&self) -> StreamFacts {
        self.facts
    }

    /// True once this session has produced every row of frame `index`.
    pub fn has_completed(&self, index: usize) -> bool {
        self.highest_completed.map_or(false, |highest| highest >= index)
    }

    fn animated(&self) -> bool {
        !self.ignore_animation && self.animation.is_animated()
    }

    /// Consumes at most one chunk from `data`, appending what it produced to `events`.
    pub fn step(&mut self, data: &[u8], all_data_received: bool, events: &mut Vec<CodecEvent>) -> PngResult<StepOutcome> {
        if self.ended {
            return Ok(StepOutcome::Ended);
        }

        let chunk = match self.reader.next_chunk(data, all_data_received)? {
            ChunkStatus::NeedMore => return Ok(StepOutcome::NeedMore),
            ChunkStatus::Chunk(chunk) => chunk,
        };

        let payload = data.get_range_safe(chunk.data_range())?;
        self.process_chunk(&chunk, payload, events)?;
        self.last_was_idat = chunk.chunk_type == ChunkType::IDAT;

        if self.ended {
            Ok(StepOutcome::Ended)
        } else {
            Ok(StepOutcome::Advanced)
        }
    }

    fn process_chunk(&mut self, chunk: &ChunkHeader, payload: &[u8], events: &mut Vec<CodecEvent>) -> PngResult<()> {
        let header = match (self.header, chunk.chunk_type) {
            (None, ChunkType::IHDR) => {
                let header = ImageHeader::parse(payload)?;
                log_debug!(
                    "IHDR {}x{} {:?} depth {} interlaced {}",
                    header.width,
                    header.height,
                    header.color_type,
                    header.bit_depth,
                    header.interlace
                );
                self.header = Some(header);
                events.push(CodecEvent::HeaderAvailable(header));
                return Ok(());
            }
            (None, _) => {
                return Err(PngError::ChunkOrdering(format!("{} chunk before IHDR", chunk.name())));
            }
            (Some(_), ChunkType::IHDR) => {
                return Err(PngError::ChunkOrdering("duplicate IHDR chunk".to_string()));
            }
            (Some(header), _) => header,
        };

        match chunk.chunk_type {
            ChunkType::IHDR => Ok(()),
            ChunkType::PLTE => self.read_palette(payload, &header),
            ChunkType::TRNS => self.read_transparency(payload, &header),
            ChunkType::GAMA => {
                self.read_gamma(payload);
                Ok(())
            }
            ChunkType::ACTL => self.read_animation_control(payload, events),
            ChunkType::FCTL => self.read_frame_control(payload, &header, events),
            ChunkType::IDAT => self.read_image_data(payload, &header, events),
            ChunkType::FDAT => self.read_frame_data(payload, &header, events),
            ChunkType::IEND => self.read_end(events),
            ChunkType::Other(_) => {
                if chunk.is_critical() {
                    return Err(PngError::invalid_chunk(&chunk.name(), "unknown critical chunk"));
                }
                Ok(())
            }
        }
    }

    fn read_palette(&mut self, payload: &[u8], header: &ImageHeader) -> PngResult<()> {
        let palette = Palette::parse(payload, header)?;

        if self.seen_idat {
            if self.animated() {
                log_debug!("PLTE after image data, applying to the next frame");
                self.colors.override_mut().palette = Some(palette);
            } else {
                log_warn!("PLTE chunk after image data, ignoring");
            }
            return Ok(());
        }

        if self.colors.palette().is_some() {
            return Err(PngError::ChunkOrdering("duplicate PLTE chunk".to_string()));
        }

        self.facts.palette_entries = palette.len();
        self.colors.shared_mut().palette = Some(palette);
        Ok(())
    }

    fn read_transparency(&mut self, payload: &[u8], header: &ImageHeader) -> PngResult<()> {
        if header.color_type == ColorType::Indexed && self.colors.palette().is_none() {
            return Err(PngError::ChunkOrdering("tRNS chunk before PLTE".to_string()));
        }

        let Some(transparency) = Transparency::parse(payload, header, self.colors.palette())? else {
            return Ok(());
        };

        if self.seen_idat {
            if self.animated() {
                log_debug!("tRNS after image data, applying to the next frame");
                self.colors.override_mut().transparency = Some(transparency);
            } else {
                log_warn!("tRNS chunk after image data, ignoring");
            }
            return Ok(());
        }

        self.facts.has_transparency = true;
        self.colors.shared_mut().transparency = Some(transparency);
        Ok(())
    }

    fn read_gamma(&mut self, payload: &[u8]) {
        if self.seen_idat {
            log_warn!("gAMA chunk after image data, ignoring");
            return;
        }

        if let Some(gamma) = parse_gamma(payload) {
            self.facts.gamma = Some(gamma);
            if self.options.apply_gamma() {
                self.gamma = Some(gamma_table(gamma));
            }
        }
    }

    fn read_animation_control(&mut self, payload: &[u8], events: &mut Vec<CodecEvent>) -> PngResult<()> {
        if self.ignore_animation {
            return Ok(());
        }

        if self.seen_idat {
            log_warn!("acTL chunk after image data, ignoring");
            return Ok(());
        }

        let control = AnimationControl::parse(payload)?;
        if self.animation.accept_control(control) {
            log_debug!("acTL: {} frames, {} plays", control.num_frames, control.num_plays);
            events.push(CodecEvent::AnimationControl(control));
        }

        Ok(())
    }

    fn read_frame_control(&mut self, payload: &[u8], header: &ImageHeader, events: &mut Vec<CodecEvent>) -> PngResult<()> {
        if self.ignore_animation {
            return Ok(());
        }

        if !self.animation.is_animated() {
            log_warn!("fcTL chunk without acTL, ignoring");
            return Ok(());
        }

        let control = FrameControl::parse(payload)?;
        self.animation.check_sequence(control.sequence_number)?;
        control.validate(header)?;

        if let Some(pending) = &self.pending {
            return Err(PngError::ChunkOrdering(format!("frame {} has no image data", pending.index)));
        }

        if let Some(active) = self.active.take() {
            if active.decoder.as_ref().map_or(false, |decoder| !decoder.is_finished()) {
                return Err(PngError::ChunkOrdering(format!(
                    "fcTL while frame {} is still incomplete",
                    active.index
                )));
            }
        }

        let source = if self.seen_idat {
            DataSource::Fdat
        } else {
            if !control.covers_canvas(header) {
                log_warn!(
                    "First frame {}x{}+{}+{} does not match the image {}x{}, decoding as a still image",
                    control.width,
                    control.height,
                    control.x_offset,
                    control.y_offset,
                    header.width,
                    header.height
                );
                events.push(CodecEvent::NotAnimated);
                self.ended = true;
                return Ok(());
            }
            DataSource::Idat
        };

        let index = self.animation.describe_frame()?;
        let info = FrameInfo::from_control(&control);

        events.push(CodecEvent::FrameDiscovered { index, info });
        self.pending = Some(PendingFrame { index, info, source });

        Ok(())
    }

    fn read_image_data(&mut self, payload: &[u8], header: &ImageHeader, events: &mut Vec<CodecEvent>) -> PngResult<()> {
        if self.seen_fdat {
            return Err(PngError::ChunkOrdering("IDAT after fdAT".to_string()));
        }

        if self.seen_idat && !self.last_was_idat {
            return Err(PngError::ChunkOrdering("non-consecutive IDAT chunks".to_string()));
        }

        if !self.seen_idat {
            if header.color_type == ColorType::Indexed && self.colors.palette().is_none() {
                return Err(PngError::ChunkOrdering("indexed image without PLTE before IDAT".to_string()));
            }

            self.seen_idat = true;

            if self.animated() {
                match self.pending.take() {
                    Some(pending) => self.start_frame(pending.index, pending.info, DataSource::Idat, header)?,
                    None => {
                        log_debug!("Default image is not part of the animation, skipping its data");
                        self.facts.default_image_hidden = true;
                    }
                }
            } else {
                let info = FrameInfo::full_canvas(header);
                events.push(CodecEvent::FrameDiscovered { index: 0, info });
                self.start_frame(0, info, DataSource::Idat, header)?;
            }
        }

        if matches!(&self.active, Some(active) if active.source == DataSource::Idat) {
            self.feed(payload, events)?;
        }

        Ok(())
    }

    fn read_frame_data(&mut self, payload: &[u8], header: &ImageHeader, events: &mut Vec<CodecEvent>) -> PngResult<()> {
        if self.ignore_animation {
            return Ok(());
        }

        if !self.animation.is_animated() {
            log_warn!("fdAT chunk without acTL, ignoring");
            return Ok(());
        }

        if payload.len() < 4 {
            return Err(PngError::invalid_chunk("fdAT", format!("length {}", payload.len())));
        }

        self.animation.check_sequence(payload.u32_at(0)?)?;
        self.seen_fdat = true;

        match self.pending.take() {
            Some(pending) if pending.source == DataSource::Fdat => {
                self.start_frame(pending.index, pending.info, DataSource::Fdat, header)?;
            }
            Some(pending) => {
                return Err(PngError::ChunkOrdering(format!(
                    "fdAT for frame {} whose data belongs in IDAT",
                    pending.index
                )));
            }
            None => match &self.active {
                Some(active) if active.source == DataSource::Fdat => {}
                _ => return Err(PngError::ChunkOrdering("fdAT before its fcTL".to_string())),
            },
        }

        self.feed(&payload[4..], events)
    }

    fn read_end(&mut self, events: &mut Vec<CodecEvent>) -> PngResult<()> {
        if !self.seen_idat {
            return Err(PngError::ChunkOrdering("IEND before any image data".to_string()));
        }

        if let Some(pending) = &self.pending {
            return Err(PngError::ChunkOrdering(format!("frame {} has no image data", pending.index)));
        }

        if let Some(active) = &self.active {
            if active.decoder.as_ref().map_or(false, |decoder| !decoder.is_finished()) {
                return Err(PngError::CorruptImageData(format!(
                    "image data ended in the middle of frame {}",
                    active.index
                )));
            }
        }

        self.ended = true;
        log_info!(
            "IEND reached at byte {} after {} frames",
            self.reader.offset(),
            self.animation.frames_described().max(1)
        );

        if self.animated() {
            let described = self.animation.frames_described();

            if described == 0 {
                log_warn!("acTL without any fcTL, decoding as a still image");
                events.push(CodecEvent::NotAnimated);
                return Ok(());
            }

            if let Some(control) = self.animation.control() {
                if (described as u32) < control.num_frames {
                    log_warn!("acTL declares {} frames but only {} were found", control.num_frames, described);
                }
            }
        }

        events.push(CodecEvent::ImageEnd);
        Ok(())
    }

    fn start_frame(&mut self, index: usize, info: FrameInfo, source: DataSource, header: &ImageHeader) -> PngResult<()> {
        let decoder = if self.plan.includes(index) {
            let converter = PixelConverter::new(
                header,
                self.colors.rgba_palette(),
                self.colors.transparency(),
                self.gamma,
                self.options.premultiply(),
            );

            log_debug!("Decoding frame {} ({}x{})", index, info.width, info.height);
            Some(ScanlineDecoder::new(*header, info.width, info.height, converter))
        } else {
            None
        };

        self.colors.take_override();
        self.active = Some(ActiveFrame {
            index,
            source,
            decoder,
            reported_complete: false,
        });

        Ok(())
    }

    fn feed(&mut self, compressed: &[u8], events: &mut Vec<CodecEvent>) -> PngResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        let Some(decoder) = active.decoder.as_mut() else {
            return Ok(());
        };

        let mut rows = Vec::new();
        decoder.push(compressed, &mut rows)?;

        let index = active.index;
        if let Some(pass) = rows.last().and_then(|row| row.pass) {
            log_debug!("Frame {} decoded into Adam7 pass {}", index, pass + 1);
        }
        events.extend(rows.into_iter().map(|row| CodecEvent::Row { index, row }));

        if decoder.is_finished() && !active.reported_complete {
            active.reported_complete = true;
            self.highest_completed = Some(index);
            events.push(CodecEvent::FrameDataComplete { index });
        }

        Ok(())
    }
}
