use flate2::{Decompress, FlushDecompress, Status};

use crate::decoders::png::header::{ColorType, ImageHeader, Transparency};
use crate::log_warn;
use crate::utils::error::{PngError, PngResult};

const ADAM7_COL_START: [u32; 7] = [0, 4, 0, 2, 0, 1, 0];
const ADAM7_ROW_START: [u32; 7] = [0, 0, 4, 0, 2, 0, 1];
const ADAM7_COL_DELTA: [u32; 7] = [8, 8, 4, 4, 2, 2, 1];
const ADAM7_ROW_DELTA: [u32; 7] = [8, 8, 8, 4, 4, 2, 2];

const INFLATE_CHUNK: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl FilterType {
    fn from_u8(value: u8) -> PngResult<Self> {
        match value {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Average),
            4 => Ok(FilterType::Paeth),
            _ => Err(PngError::CorruptImageData(format!("invalid filter type {}", value))),
        }
    }
}

/// One decoded row of a frame, already expanded to RGBA8.
///
/// Pixel `n` of the row lands at frame-local column `x_start + n * x_step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow {
    pub pass: Option<u8>,
    pub y: u32,
    pub x_start: u32,
    pub x_step: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct PassGeometry {
    pass: Option<u8>,
    width: u32,
    height: u32,
    x_start: u32,
    x_step: u32,
    y_start: u32,
    y_step: u32,
}

fn pass_layout(width: u32, height: u32, interlace: bool) -> Vec<PassGeometry> {
    if !interlace {
        return vec![PassGeometry {
            pass: None,
            width,
            height,
            x_start: 0,
            x_step: 1,
            y_start: 0,
            y_step: 1,
        }];
    }

    (0..7)
        .filter_map(|pass| {
            let pass_width = (width + ADAM7_COL_DELTA[pass] - 1 - ADAM7_COL_START[pass]) / ADAM7_COL_DELTA[pass];
            let pass_height = (height + ADAM7_ROW_DELTA[pass] - 1 - ADAM7_ROW_START[pass]) / ADAM7_ROW_DELTA[pass];

            if pass_width == 0 || pass_height == 0 {
                return None;
            }

            Some(PassGeometry {
                pass: Some(pass as u8),
                width: pass_width,
                height: pass_height,
                x_start: ADAM7_COL_START[pass],
                x_step: ADAM7_COL_DELTA[pass],
                y_start: ADAM7_ROW_START[pass],
                y_step: ADAM7_ROW_DELTA[pass],
            })
        })
        .collect()
}

fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    // a = left, b = above, c = upper left
    let a = a as i16;
    let b = b as i16;
    let c = c as i16;

    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        a as u8
    } else if pb <= pc {
        b as u8
    } else {
        c as u8
    }
}

/// Reverses the scanline filter in place; `prior` is the previous unfiltered row of the pass.
fn unfilter_row(filter: FilterType, row: &mut [u8], prior: &[u8], stride: usize) {
    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for i in stride..row.len() {
                row[i] = row[i].wrapping_add(row[i - stride]);
            }
        }
        FilterType::Up => {
            for (value, above) in row.iter_mut().zip(prior) {
                *value = value.wrapping_add(*above);
            }
        }
        FilterType::Average => {
            for i in 0..row.len() {
                let left = if i >= stride { row[i - stride] as u16 } else { 0 };
                let above = prior[i] as u16;
                row[i] = row[i].wrapping_add(((left + above) >> 1) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..row.len() {
                let (left, upper_left) = if i >= stride { (row[i - stride], prior[i - stride]) } else { (0, 0) };
                row[i] = row[i].wrapping_add(paeth_predictor(left, prior[i], upper_left));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorKey {
    Gray(u16),
    Rgb(u16, u16, u16),
}

/// Expands unfiltered rows of any PNG color type to RGBA8.
#[derive(Debug, Clone)]
pub struct PixelConverter {
    color_type: ColorType,
    bit_depth: u8,
    palette: Vec<[u8; 4]>,
    key: Option<ColorKey>,
    gamma: Option<[u8; 256]>,
    premultiply: bool,
}

impl PixelConverter {
    pub fn new(
        header: &ImageHeader,
        palette: Vec<[u8; 4]>,
        transparency: Option<&Transparency>,
        gamma: Option<[u8; 256]>,
        premultiply: bool,
    ) -> Self {
        let key = match transparency {
            Some(Transparency::Grayscale(gray)) => Some(ColorKey::Gray(*gray)),
            Some(Transparency::RGB(r, g, b)) => Some(ColorKey::Rgb(*r, *g, *b)),
            _ => None,
        };

        let palette = match &gamma {
            Some(table) => palette
                .into_iter()
                .map(|[r, g, b, a]| [table[r as usize], table[g as usize], table[b as usize], a])
                .collect(),
            None => palette,
        };

        Self {
            color_type: header.color_type,
            bit_depth: header.bit_depth,
            palette,
            key,
            gamma,
            premultiply,
        }
    }

    fn sample(&self, raw: &[u8], index: usize) -> u16 {
        match self.bit_depth {
            16 => u16::from_be_bytes([raw[index * 2], raw[index * 2 + 1]]),
            8 => raw[index] as u16,
            depth => {
                let depth = depth as usize;
                let per_byte = 8 / depth;
                let byte = raw[index / per_byte];
                let shift = (per_byte - 1 - index % per_byte) * depth;
                ((byte >> shift) & ((1u16 << depth) - 1) as u8) as u16
            }
        }
    }

    fn to_u8(&self, sample: u16) -> u8 {
        match self.bit_depth {
            16 => (sample >> 8) as u8,
            8 => sample as u8,
            depth => (sample * 255 / ((1u16 << depth) - 1)) as u8,
        }
    }

    fn color(&self, value: u8) -> u8 {
        match &self.gamma {
            Some(table) => table[value as usize],
            None => value,
        }
    }

    pub fn convert_row(&self, raw: &[u8], width: u32, out: &mut Vec<u8>) -> PngResult<()> {
        out.clear();
        out.reserve(width as usize * 4);

        for x in 0..width as usize {
            let pixel = match self.color_type {
                ColorType::Grayscale => {
                    let gray = self.sample(raw, x);
                    let alpha = match self.key {
                        Some(ColorKey::Gray(key)) if key == gray => 0,
                        _ => 255,
                    };
                    let value = self.color(self.to_u8(gray));
                    [value, value, value, alpha]
                }
                ColorType::GrayscaleAlpha => {
                    let value = self.color(self.to_u8(self.sample(raw, x * 2)));
                    [value, value, value, self.to_u8(self.sample(raw, x * 2 + 1))]
                }
                ColorType::RGB => {
                    let (r, g, b) = (self.sample(raw, x * 3), self.sample(raw, x * 3 + 1), self.sample(raw, x * 3 + 2));
                    let alpha = match self.key {
                        Some(ColorKey::Rgb(kr, kg, kb)) if (kr, kg, kb) == (r, g, b) => 0,
                        _ => 255,
                    };
                    [
                        self.color(self.to_u8(r)),
                        self.color(self.to_u8(g)),
                        self.color(self.to_u8(b)),
                        alpha,
                    ]
                }
                ColorType::RGBA => [
                    self.color(self.to_u8(self.sample(raw, x * 4))),
                    self.color(self.to_u8(self.sample(raw, x * 4 + 1))),
                    self.color(self.to_u8(self.sample(raw, x * 4 + 2))),
                    self.to_u8(self.sample(raw, x * 4 + 3)),
                ],
                ColorType::Indexed => {
                    let index = self.sample(raw, x) as usize;
                    match self.palette.get(index) {
                        Some(entry) => *entry,
                        None => {
                            return Err(PngError::CorruptImageData(format!(
                                "palette index {} out of range ({} entries)",
                                index,
                                self.palette.len()
                            )));
                        }
                    }
                }
            };

            out.extend_from_slice(&premultiply(pixel, self.premultiply));
        }

        Ok(())
    }
}

fn premultiply(pixel: [u8; 4], enabled: bool) -> [u8; 4] {
    let alpha = pixel[3] as u32;
    if !enabled || alpha == 255 {
        return pixel;
    }

    let scale = |c: u8| ((c as u32 * alpha + 127) / 255) as u8;
    [scale(pixel[0]), scale(pixel[1]), scale(pixel[2]), pixel[3]]
}

/// Streaming decoder for one frame's compressed data.
///
/// Compressed bytes can be pushed in arbitrarily small pieces; every scanline that
/// becomes complete is unfiltered, expanded and returned.
pub struct ScanlineDecoder {
    inflater: Decompress,
    header: ImageHeader,
    converter: PixelConverter,
    passes: Vec<PassGeometry>,
    current_pass: usize,
    row_in_pass: u32,
    pending: Vec<u8>,
    prior: Vec<u8>,
    scratch: Vec<u8>,
    stream_ended: bool,
}

impl ScanlineDecoder {
    pub fn new(header: ImageHeader, width: u32, height: u32, converter: PixelConverter) -> Self {
        let passes = pass_layout(width, height, header.interlace);
        let prior = passes
            .first()
            .map(|pass| vec![0; header.row_bytes(pass.width)])
            .unwrap_or_default();

        Self {
            inflater: Decompress::new(true),
            header,
            converter,
            passes,
            current_pass: 0,
            row_in_pass: 0,
            pending: Vec::new(),
            prior,
            scratch: vec![0; INFLATE_CHUNK],
            stream_ended: false,
        }
    }

    /// True once every row of every pass has been produced.
    pub fn is_finished(&self) -> bool {
        self.current_pass >= self.passes.len()
    }

    pub fn push(&mut self, compressed: &[u8], rows: &mut Vec<DecodedRow>) -> PngResult<()> {
        // Trailing adler32 bytes and padding after the last row are not needed.
        if self.is_finished() || self.stream_ended {
            return Ok(());
        }

        let mut input = compressed;

        loop {
            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();

            let status = self
                .inflater
                .decompress(input, &mut self.scratch, FlushDecompress::None)?;

            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;

            input = &input[consumed..];
            self.pending.extend_from_slice(&self.scratch[..produced]);
            self.drain_rows(rows)?;

            if status == Status::StreamEnd {
                self.stream_ended = true;
                break;
            }

            if self.is_finished() || (consumed == 0 && produced == 0) {
                break;
            }
        }

        if self.stream_ended && !self.is_finished() {
            return Err(PngError::CorruptImageData(
                "compressed stream ended before the last scanline".to_string(),
            ));
        }

        Ok(())
    }

    fn drain_rows(&mut self, rows: &mut Vec<DecodedRow>) -> PngResult<()> {
        let stride = self.header.filter_stride();
        let mut cursor = 0;

        while let Some(pass) = self.passes.get(self.current_pass).copied() {
            let row_bytes = self.header.row_bytes(pass.width);

            if self.pending.len() - cursor < row_bytes + 1 {
                break;
            }

            let filter = FilterType::from_u8(self.pending[cursor])?;
            let mut row = self.pending[cursor + 1..cursor + 1 + row_bytes].to_vec();
            cursor += row_bytes + 1;

            unfilter_row(filter, &mut row, &self.prior, stride);

            let mut pixels = Vec::new();
            self.converter.convert_row(&row, pass.width, &mut pixels)?;

            rows.push(DecodedRow {
                pass: pass.pass,
                y: pass.y_start + self.row_in_pass * pass.y_step,
                x_start: pass.x_start,
                x_step: pass.x_step,
                pixels,
            });

            self.prior = row;
            self.row_in_pass += 1;

            if self.row_in_pass == pass.height {
                self.current_pass += 1;
                self.row_in_pass = 0;

                if let Some(next) = self.passes.get(self.current_pass) {
                    self.prior = vec![0; self.header.row_bytes(next.width)];
                }
            }
        }

        self.pending.drain(..cursor);

        if self.is_finished() && !self.pending.is_empty() {
            log_warn!("Discarding {} bytes of surplus scanline data", self.pending.len());
            self.pending.clear();
        }

        Ok(())
    }
}
