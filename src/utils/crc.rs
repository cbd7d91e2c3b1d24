use flate2::Crc;

/// CRC of a chunk, covering its type tag and payload but not its length.
pub(crate) fn chunk_crc(tag: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(tag);
    crc.update(data);
    crc.sum()
}
