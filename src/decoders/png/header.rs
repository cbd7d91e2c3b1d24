use serde::Serialize;

use crate::log_warn;
use crate::utils::error::{PngError, PngResult};
use crate::utils::traits::{BigEndianFields, SafeAccess};

const MAX_PALETTE_ENTRIES: usize = 256;

// Largest gAMA value we still believe; anything past this is treated as garbage.
const MAX_GAMMA: f64 = 21474.83;
const DEFAULT_SCREEN_GAMMA: f64 = 2.2;
const DEFAULT_FILE_GAMMA: f64 = 1.0 / DEFAULT_SCREEN_GAMMA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorType {
    Grayscale = 0,
    RGB = 2,
    Indexed = 3,
    GrayscaleAlpha = 4,
    RGBA = 6,
}

impl ColorType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ColorType::Grayscale),
            2 => Some(ColorType::RGB),
            3 => Some(ColorType::Indexed),
            4 => Some(ColorType::GrayscaleAlpha),
            6 => Some(ColorType::RGBA),
            _ => None,
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            ColorType::Grayscale | ColorType::Indexed => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::RGB => 3,
            ColorType::RGBA => 4,
        }
    }

    fn allows_bit_depth(&self, bit_depth: u8) -> bool {
        match self {
            ColorType::Grayscale => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
            ColorType::Indexed => matches!(bit_depth, 1 | 2 | 4 | 8),
            ColorType::RGB | ColorType::GrayscaleAlpha | ColorType::RGBA => matches!(bit_depth, 8 | 16),
        }
    }
}

/// Parsed IHDR chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
    pub interlace: bool,
}

impl ImageHeader {
    pub(crate) fn parse(data: &[u8]) -> PngResult<Self> {
        if data.len() != 13 {
            return Err(PngError::invalid_chunk("IHDR", format!("length {} instead of 13", data.len())));
        }

        let width = data.u32_at(0)?;
        let height = data.u32_at(4)?;
        let bit_depth = data.u8_at(8)?;
        let color_type = data.u8_at(9)?;
        let compression_method = data.u8_at(10)?;
        let filter_method = data.u8_at(11)?;
        let interlace_method = data.u8_at(12)?;

        if width == 0 || height == 0 || width > 0x7fff_ffff || height > 0x7fff_ffff {
            return Err(PngError::InvalidDimensions { width, height });
        }

        let color_type = ColorType::from_u8(color_type)
            .ok_or_else(|| PngError::invalid_chunk("IHDR", format!("color type {}", color_type)))?;

        if !color_type.allows_bit_depth(bit_depth) {
            return Err(PngError::invalid_chunk(
                "IHDR",
                format!("bit depth {} not allowed for {:?}", bit_depth, color_type),
            ));
        }

        if compression_method != 0 {
            return Err(PngError::invalid_chunk("IHDR", format!("compression method {}", compression_method)));
        }

        if filter_method != 0 {
            return Err(PngError::invalid_chunk("IHDR", format!("filter method {}", filter_method)));
        }

        let interlace = match interlace_method {
            0 => false,
            1 => true,
            _ => {
                return Err(PngError::invalid_chunk("IHDR", format!("interlace method {}", interlace_method)));
            }
        };

        Ok(Self {
            width,
            height,
            bit_depth,
            color_type,
            interlace,
        })
    }

    pub fn bits_per_pixel(&self) -> usize {
        self.bit_depth as usize * self.color_type.channels() as usize
    }

    /// Byte distance used by the Sub/Average/Paeth filters (at least one byte).
    pub fn filter_stride(&self) -> usize {
        (self.bits_per_pixel() + 7) / 8
    }

    /// Size of an unfiltered row of `width` pixels, without the filter byte.
    pub fn row_bytes(&self, width: u32) -> usize {
        (self.bits_per_pixel() * width as usize + 7) / 8
    }
}

/// Parsed acTL chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnimationControl {
    pub num_frames: u32,
    pub num_plays: u32,
}

impl AnimationControl {
    pub(crate) fn parse(data: &[u8]) -> PngResult<Self> {
        if data.len() != 8 {
            return Err(PngError::invalid_chunk("acTL", format!("length {} instead of 8", data.len())));
        }

        Ok(Self {
            num_frames: data.u32_at(0)?,
            num_plays: data.u32_at(4)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisposeOp {
    None,
    Background,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlendOp {
    Source,
    Over,
}

/// Parsed fcTL chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameControl {
    pub sequence_number: u32,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub delay_num: u16,
    pub delay_den: u16,
    pub dispose_op: DisposeOp,
    pub blend_op: BlendOp,
}

impl FrameControl {
    pub(crate) fn parse(data: &[u8]) -> PngResult<Self> {
        if data.len() != 26 {
            return Err(PngError::invalid_chunk("fcTL", format!("length {} instead of 26", data.len())));
        }

        let dispose_op = match data.u8_at(24)? {
            0 => DisposeOp::None,
            1 => DisposeOp::Background,
            2 => DisposeOp::Previous,
            n => return Err(PngError::invalid_chunk("fcTL", format!("dispose_op {}", n))),
        };

        let blend_op = match data.u8_at(25)? {
            0 => BlendOp::Source,
            1 => BlendOp::Over,
            n => return Err(PngError::invalid_chunk("fcTL", format!("blend_op {}", n))),
        };

        Ok(Self {
            sequence_number: data.u32_at(0)?,
            width: data.u32_at(4)?,
            height: data.u32_at(8)?,
            x_offset: data.u32_at(12)?,
            y_offset: data.u32_at(16)?,
            delay_num: data.u16_at(20)?,
            delay_den: data.u16_at(22)?,
            dispose_op,
            blend_op,
        })
    }

    /// Checks that the frame region is non-empty and lies inside the canvas.
    pub(crate) fn validate(&self, header: &ImageHeader) -> PngResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PngError::invalid_chunk(
                "fcTL",
                format!("empty frame {}x{}", self.width, self.height),
            ));
        }

        let right = self.x_offset.checked_add(self.width);
        let bottom = self.y_offset.checked_add(self.height);

        match (right, bottom) {
            (Some(right), Some(bottom)) if right <= header.width && bottom <= header.height => Ok(()),
            _ => Err(PngError::invalid_chunk(
                "fcTL",
                format!(
                    "frame {}x{}+{}+{} exceeds canvas {}x{}",
                    self.width, self.height, self.x_offset, self.y_offset, header.width, header.height
                ),
            )),
        }
    }

    pub(crate) fn covers_canvas(&self, header: &ImageHeader) -> bool {
        self.x_offset == 0 && self.y_offset == 0 && self.width == header.width && self.height == header.height
    }
}

/// PLTE entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(pub Vec<[u8; 3]>);

impl Palette {
    pub(crate) fn parse(data: &[u8], header: &ImageHeader) -> PngResult<Self> {
        if data.is_empty() || data.len() % 3 != 0 || data.len() > MAX_PALETTE_ENTRIES * 3 {
            return Err(PngError::invalid_chunk("PLTE", format!("length {}", data.len())));
        }

        if matches!(header.color_type, ColorType::Grayscale | ColorType::GrayscaleAlpha) {
            return Err(PngError::ChunkOrdering(format!(
                "PLTE present in {:?} image",
                header.color_type
            )));
        }

        let entries = data.len() / 3;
        if header.color_type == ColorType::Indexed && entries > (1usize << header.bit_depth) {
            log_warn!(
                "PLTE has {} entries, more than a {}-bit index can address",
                entries,
                header.bit_depth
            );
        }

        Ok(Palette(data.chunks_exact(3).map(|rgb| [rgb[0], rgb[1], rgb[2]]).collect()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// tRNS contents, shaped by the image color type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transparency {
    Grayscale(u16),
    RGB(u16, u16, u16),
    Palette(Vec<u8>),
}

impl Transparency {
    /// Returns `Ok(None)` for a tRNS chunk that must be ignored rather than rejected.
    pub(crate) fn parse(data: &[u8], header: &ImageHeader, palette: Option<&Palette>) -> PngResult<Option<Self>> {
        match header.color_type {
            ColorType::Grayscale => {
                if data.len() != 2 {
                    return Err(PngError::invalid_chunk("tRNS", format!("length {} for grayscale", data.len())));
                }

                Ok(Some(Transparency::Grayscale(data.u16_at(0)?)))
            }
            ColorType::RGB => {
                if data.len() != 6 {
                    return Err(PngError::invalid_chunk("tRNS", format!("length {} for RGB", data.len())));
                }

                Ok(Some(Transparency::RGB(data.u16_at(0)?, data.u16_at(2)?, data.u16_at(4)?)))
            }
            ColorType::Indexed => {
                if data.len() > MAX_PALETTE_ENTRIES {
                    return Err(PngError::invalid_chunk("tRNS", format!("{} palette alpha entries", data.len())));
                }

                let mut alpha = data.to_vec();

                match palette {
                    Some(palette) if alpha.len() > palette.len() => {
                        log_warn!("tRNS has {} entries for a {} entry palette, truncating", alpha.len(), palette.len());
                        alpha.truncate(palette.len());
                    }
                    None => log_warn!("tRNS chunk before PLTE chunk"),
                    _ => {}
                }

                Ok(Some(Transparency::Palette(alpha)))
            }
            ColorType::GrayscaleAlpha | ColorType::RGBA => {
                log_warn!("tRNS chunk not allowed for color type {:?}, ignoring", header.color_type);
                Ok(None)
            }
        }
    }
}

/// Reads gAMA, returning `None` when the chunk is malformed and should be ignored.
pub(crate) fn parse_gamma(data: &[u8]) -> Option<f64> {
    if data.len() != 4 {
        log_warn!("gAMA chunk with length {}, ignoring", data.len());
        return None;
    }

    let value = data.u32_at(0).ok()?;
    if value == 0 {
        log_warn!("gAMA chunk with zero gamma, ignoring");
        return None;
    }

    Some(value as f64 / 100000.0)
}

/// 8-bit lookup table mapping file samples to display samples.
pub(crate) fn gamma_table(file_gamma: f64) -> [u8; 256] {
    let file_gamma = if file_gamma <= 0.0 || file_gamma >= MAX_GAMMA {
        DEFAULT_FILE_GAMMA
    } else {
        file_gamma
    };

    let exponent = 1.0 / (file_gamma * DEFAULT_SCREEN_GAMMA);
    let mut table = [0u8; 256];

    for (i, entry) in table.iter_mut().enumerate() {
        let normalized = i as f64 / 255.0;
        *entry = (normalized.powf(exponent) * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    table
}

/// Palette and transparency captured from the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorTables {
    pub palette: Option<Palette>,
    pub transparency: Option<Transparency>,
}

/// Shared tables plus an optional override for the next frame to decode.
///
/// Lookups consult the override first and fall back to the shared tables per field.
#[derive(Debug, Clone, Default)]
pub(crate) struct ColorLayers {
    shared: ColorTables,
    frame: Option<ColorTables>,
}

impl ColorLayers {
    pub fn shared_mut(&mut self) -> &mut ColorTables {
        &mut self.shared
    }

    pub fn override_mut(&mut self) -> &mut ColorTables {
        self.frame.get_or_insert_with(ColorTables::default)
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.frame
            .as_ref()
            .and_then(|tables| tables.palette.as_ref())
            .or(self.shared.palette.as_ref())
    }

    pub fn transparency(&self) -> Option<&Transparency> {
        self.frame
            .as_ref()
            .and_then(|tables| tables.transparency.as_ref())
            .or(self.shared.transparency.as_ref())
    }

    /// Drops the override once the frame it was meant for has started decoding.
    pub fn take_override(&mut self) -> Option<ColorTables> {
        self.frame.take()
    }

    /// Palette with alpha merged in, the form the scanline codec consumes.
    pub fn rgba_palette(&self) -> Vec<[u8; 4]> {
        let alpha = match self.transparency() {
            Some(Transparency::Palette(alpha)) => alpha.as_slice(),
            _ => &[],
        };

        self.palette()
            .map(|palette| {
                palette
                    .0
                    .iter()
                    .enumerate()
                    .map(|(i, rgb)| {
                        let a = alpha.get_safe(i).copied().unwrap_or(255);
                        [rgb[0], rgb[1], rgb[2], a]
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
