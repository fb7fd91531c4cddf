//! CRC-32 checksum utility for migration drift detection.

/// Compute the CRC-32 checksum of migration content.
///
/// Content is fed line by line without line terminators, so a script re-saved
/// with `\r\n` endings produces the same value as its `\n` original.
pub fn calculate(content: &str) -> i32 {
    let mut hasher = crc32fast::Hasher::new();
    for line in content.lines() {
        hasher.update(line.as_bytes());
    }
    hasher.finalize() as i32
}
