use serde::Serialize;

use crate::decoders::png::frame::FrameInfo;
use crate::decoders::png::header::{AnimationControl, ImageHeader};
use crate::decoders::png::scanline::DecodedRow;
use crate::utils::error::PngError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecodeState {
    AwaitingHeader,
    HaveSize,
    DecodingFrame { index: usize },
    Complete,
    Failed,
}

/// What a decode session reports after consuming a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecEvent {
    HeaderAvailable(ImageHeader),
    AnimationControl(AnimationControl),
    FrameDiscovered { index: usize, info: FrameInfo },
    Row { index: usize, row: DecodedRow },
    FrameDataComplete { index: usize },
    ImageEnd,
    NotAnimated,
}

/// Work the decoder performs on its own state as a result of a transition.
#[derive(Debug)]
pub enum Effect {
    SizeAvailable(ImageHeader),
    RecordAnimation(AnimationControl),
    RegisterFrame { index: usize, info: FrameInfo },
    AllocateFrame(usize),
    WriteRow { index: usize, row: DecodedRow },
    CompleteFrame(usize),
    CollapseToStatic,
    Fail(PngError),
}

fn fail(error: PngError) -> (DecodeState, Vec<Effect>) {
    (DecodeState::Failed, vec![Effect::Fail(error)])
}

impl CodecEvent {
    fn name(&self) -> &'static str {
        match self {
            CodecEvent::HeaderAvailable(_) => "header",
            CodecEvent::AnimationControl(_) => "animation control",
            CodecEvent::FrameDiscovered { .. } => "frame control",
            CodecEvent::Row { .. } => "image row",
            CodecEvent::FrameDataComplete { .. } => "frame completion",
            CodecEvent::ImageEnd => "image end",
            CodecEvent::NotAnimated => "animation fallback",
        }
    }
}

fn before_header(event: &CodecEvent) -> PngError {
    PngError::ChunkOrdering(format!("{} before IHDR", event.name()))
}

/// Pure transition function of the decode state machine.
pub fn transition(state: DecodeState, event: CodecEvent) -> (DecodeState, Vec<Effect>) {
    use DecodeState::*;

    match (state, event) {
        (Failed, _) => (Failed, Vec::new()),
        (Complete, _) => (Complete, Vec::new()),

        (AwaitingHeader, CodecEvent::HeaderAvailable(header)) => (HaveSize, vec![Effect::SizeAvailable(header)]),
        (AwaitingHeader, event) => fail(before_header(&event)),
        (_, CodecEvent::HeaderAvailable(_)) => fail(PngError::ChunkOrdering("duplicate IHDR".to_string())),

        (state, CodecEvent::AnimationControl(control)) => (state, vec![Effect::RecordAnimation(control)]),
        (state, CodecEvent::FrameDiscovered { index, info }) => (state, vec![Effect::RegisterFrame { index, info }]),

        (HaveSize, CodecEvent::Row { index, row }) => (
            DecodingFrame { index },
            vec![Effect::AllocateFrame(index), Effect::WriteRow { index, row }],
        ),
        (DecodingFrame { index: active }, CodecEvent::Row { index, row }) if active == index => {
            (state, vec![Effect::WriteRow { index, row }])
        }
        (DecodingFrame { index: active }, CodecEvent::FrameDataComplete { index }) if active == index => {
            (HaveSize, vec![Effect::CompleteFrame(index)])
        }
        (DecodingFrame { index: active }, CodecEvent::Row { index, .. } | CodecEvent::FrameDataComplete { index }) => {
            fail(PngError::FrameIndex(format!(
                "data for frame {} while frame {} is still decoding",
                index, active
            )))
        }
        (HaveSize, CodecEvent::FrameDataComplete { index }) => {
            fail(PngError::FrameIndex(format!("frame {} completed without any rows", index)))
        }

        (HaveSize, CodecEvent::ImageEnd) => (Complete, Vec::new()),
        (DecodingFrame { index }, CodecEvent::ImageEnd) => fail(PngError::CorruptImageData(format!(
            "image ended in the middle of frame {}",
            index
        ))),

        (HaveSize, CodecEvent::NotAnimated) => (HaveSize, vec![Effect::CollapseToStatic]),
        (DecodingFrame { index }, CodecEvent::NotAnimated) => fail(PngError::ChunkOrdering(format!(
            "animation dropped while frame {} was decoding",
            index
        ))),
    }
}
