use std::ops::Range;

use crate::utils::crc::chunk_crc;
use crate::utils::error::{PngError, PngResult};
use crate::utils::options::DecoderOptions;
use crate::utils::traits::{BigEndianFields, SafeAccess};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

// Length + type in front of the payload, CRC behind it.
const CHUNK_PREFIX: usize = 8;
const CHUNK_OVERHEAD: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    // Critical chunks
    IHDR,  // Image header
    PLTE,  // Palette
    IDAT,  // Image data
    IEND,  // End of image

    // Ancillary chunks the decoder acts on
    TRNS,  // Transparency
    GAMA,  // Gamma

    // Animation chunks
    ACTL,  // Animation control
    FCTL,  // Frame control
    FDAT,  // Frame data

    Other([u8; 4]),
}

impl ChunkType {
    pub fn from_tag(tag: [u8; 4]) -> ChunkType {
        match &tag {
            b"IHDR" => ChunkType::IHDR,
            b"PLTE" => ChunkType::PLTE,
            b"IDAT" => ChunkType::IDAT,
            b"IEND" => ChunkType::IEND,
            b"tRNS" => ChunkType::TRNS,
            b"gAMA" => ChunkType::GAMA,
            b"acTL" => ChunkType::ACTL,
            b"fcTL" => ChunkType::FCTL,
            b"fdAT" => ChunkType::FDAT,
            _ => ChunkType::Other(tag),
        }
    }
}

/// Location and framing of one complete chunk inside the stream buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub length: u32,
    pub tag: [u8; 4],
    pub chunk_type: ChunkType,
    pub data_offset: usize,
    pub crc: u32,
}

impl ChunkHeader {
    pub fn data_range(&self) -> Range<usize> {
        self.data_offset..self.data_offset + self.length as usize
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.tag).to_string()
    }

    /// Critical chunks have an uppercase first letter (bit 5 clear).
    pub fn is_critical(&self) -> bool {
        self.tag[0] & 0x20 == 0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    NeedMore,
    Chunk(ChunkHeader),
}

/// Walks a growing byte buffer chunk by chunk.
///
/// The reader never copies payloads; it only remembers how far it got, so the same
/// buffer can keep growing between calls.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    offset: usize,
    signature_checked: bool,
    max_chunk_length: u32,
    verify_crc: bool,
}

impl ChunkReader {
    pub fn new(options: &DecoderOptions) -> Self {
        Self {
            offset: 0,
            signature_checked: false,
            max_chunk_length: options.max_chunk_length,
            verify_crc: options.verify_crc,
        }
    }

    /// Offset of the first byte not yet consumed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn next_chunk(&mut self, data: &[u8], all_data_received: bool) -> PngResult<ChunkStatus> {
        if !self.signature_checked {
            let available = data.len().min(PNG_SIGNATURE.len());

            if data[..available] != PNG_SIGNATURE[..available] {
                return Err(PngError::InvalidSignature);
            }

            if available < PNG_SIGNATURE.len() {
                return Self::need_more(all_data_received);
            }

            self.signature_checked = true;
            self.offset = PNG_SIGNATURE.len();
        }

        let remaining = data.len().saturating_sub(self.offset);
        if remaining < CHUNK_PREFIX {
            return Self::need_more(all_data_received);
        }

        let length = data.u32_at(self.offset)?;
        let tag_bytes = data.get_range_safe(self.offset + 4..self.offset + CHUNK_PREFIX)?;
        let tag = [tag_bytes[0], tag_bytes[1], tag_bytes[2], tag_bytes[3]];
        let name = String::from_utf8_lossy(&tag).to_string();

        if !tag.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(PngError::invalid_chunk(&name, "chunk type is not four ASCII letters"));
        }

        if length > self.max_chunk_length {
            return Err(PngError::ChunkTooLarge {
                chunk: name,
                length,
                limit: self.max_chunk_length as u64,
            });
        }

        let total = CHUNK_OVERHEAD + length as usize;
        if remaining < total {
            if all_data_received {
                // Nothing else is coming, so the declared length can never be satisfied.
                return Err(PngError::ChunkTooLarge {
                    chunk: name,
                    length,
                    limit: remaining.saturating_sub(CHUNK_OVERHEAD) as u64,
                });
            }

            return Ok(ChunkStatus::NeedMore);
        }

        let data_offset = self.offset + CHUNK_PREFIX;
        let payload = data.get_range_safe(data_offset..data_offset + length as usize)?;
        let crc = data.u32_at(data_offset + length as usize)?;

        if self.verify_crc {
            let calculated = chunk_crc(&tag, payload);

            if calculated != crc {
                return Err(PngError::CrcMismatch {
                    chunk: name,
                    expected: crc,
                    calculated,
                });
            }
        }

        self.offset += total;

        Ok(ChunkStatus::Chunk(ChunkHeader {
            length,
            tag,
            chunk_type: ChunkType::from_tag(tag),
            data_offset,
            crc,
        }))
    }

    fn need_more(all_data_received: bool) -> PngResult<ChunkStatus> {
        if all_data_received {
            Err(PngError::TruncatedStream)
        } else {
            Ok(ChunkStatus::NeedMore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(payload);
        out.extend_from_slice(&chunk_crc(tag, payload).to_be_bytes());
        out
    }

    #[test]
    fn waits_for_complete_chunks() {
        let mut stream = PNG_SIGNATURE.to_vec();
        stream.extend(chunk(b"tEXt", b"hello"));

        let mut reader = ChunkReader::new(&DecoderOptions::default());

        for cut in 0..stream.len() {
            let mut probe = reader.clone();
            assert_eq!(probe.next_chunk(&stream[..cut], false).unwrap(), ChunkStatus::NeedMore);
        }

        match reader.next_chunk(&stream, false).unwrap() {
            ChunkStatus::Chunk(header) => {
                assert_eq!(header.length, 5);
                assert_eq!(header.chunk_type, ChunkType::Other(*b"tEXt"));
                assert_eq!(&stream[header.data_range()], b"hello");
                assert!(!header.is_critical());
            }
            ChunkStatus::NeedMore => panic!("chunk should be complete"),
        }

        assert_eq!(reader.offset(), stream.len());
    }

    #[test]
    fn rejects_wrong_signature_early() {
        let mut reader = ChunkReader::new(&DecoderOptions::default());
        assert!(matches!(reader.next_chunk(&[0x89, b'G'], false), Err(PngError::InvalidSignature)));
    }

    #[test]
    fn rejects_absurd_length_without_waiting() {
        let mut stream = PNG_SIGNATURE.to_vec();
        stream.extend_from_slice(&0xffff_fff0u32.to_be_bytes());
        stream.extend_from_slice(b"IDAT");

        let mut reader = ChunkReader::new(&DecoderOptions::default());
        assert!(matches!(
            reader.next_chunk(&stream, false),
            Err(PngError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn truncation_is_fatal_once_all_data_arrived() {
        let mut stream = PNG_SIGNATURE.to_vec();
        stream.extend(chunk(b"IDAT", &[1, 2, 3, 4]));
        stream.truncate(stream.len() - 2);

        let mut reader = ChunkReader::new(&DecoderOptions::default());
        assert_eq!(reader.next_chunk(&stream, false).unwrap(), ChunkStatus::NeedMore);
        assert!(reader.next_chunk(&stream, true).is_err());
    }

    #[test]
    fn detects_crc_mismatch() {
        let mut stream = PNG_SIGNATURE.to_vec();
        stream.extend(chunk(b"IEND", &[]));
        let last = stream.len() - 1;
        stream[last] ^= 0xff;

        let mut reader = ChunkReader::new(&DecoderOptions::default());
        assert!(matches!(reader.next_chunk(&stream, false), Err(PngError::CrcMismatch { .. })));

        let mut lenient = ChunkReader::new(&DecoderOptions::default().with_crc_verification(false));
        assert!(matches!(lenient.next_chunk(&stream, false), Ok(ChunkStatus::Chunk(_))));
    }
}
