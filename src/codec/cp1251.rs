//! Windows-1251 decoding for launcher scripts written by older tools.

/// Upper half of the code page (`0x80..=0xBF`); `0xC0..=0xFF` is the
/// contiguous Cyrillic block and handled arithmetically.
#[rustfmt::skip]
const HIGH: [Option<char>; 64] = [
    Some('\u{0402}'), Some('\u{0403}'), Some('\u{201A}'), Some('\u{0453}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{20AC}'), Some('\u{2030}'), Some('\u{0409}'), Some('\u{2039}'),
    Some('\u{040A}'), Some('\u{040C}'), Some('\u{040B}'), Some('\u{040F}'),
    Some('\u{0452}'), Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    None,             Some('\u{2122}'), Some('\u{0459}'), Some('\u{203A}'),
    Some('\u{045A}'), Some('\u{045C}'), Some('\u{045B}'), Some('\u{045F}'),
    Some('\u{00A0}'), Some('\u{040E}'), Some('\u{045E}'), Some('\u{0408}'),
    Some('\u{00A4}'), Some('\u{0490}'), Some('\u{00A6}'), Some('\u{00A7}'),
    Some('\u{0401}'), Some('\u{00A9}'), Some('\u{0404}'), Some('\u{00AB}'),
    Some('\u{00AC}'), Some('\u{00AD}'), Some('\u{00AE}'), Some('\u{0407}'),
    Some('\u{00B0}'), Some('\u{00B1}'), Some('\u{0406}'), Some('\u{0456}'),
    Some('\u{0491}'), Some('\u{00B5}'), Some('\u{00B6}'), Some('\u{00B7}'),
    Some('\u{0451}'), Some('\u{2116}'), Some('\u{0454}'), Some('\u{00BB}'),
    Some('\u{0458}'), Some('\u{0405}'), Some('\u{0455}'), Some('\u{0457}'),
];

/// Decode a single byte, `None` for the one unassigned position (`0x98`).
fn decode_byte(byte: u8) -> Option<char> {
    match byte {
        0x00..=0x7F => Some(char::from(byte)),
        0x80..=0xBF => HIGH[usize::from(byte - 0x80)],
        0xC0..=0xFF => char::from_u32(0x0410 + u32::from(byte - 0xC0)),
    }
}

/// Decode a Windows-1251 byte string.
pub(crate) fn decode(bytes: &[u8]) -> Option<String> {
    bytes.iter().map(|&b| decode_byte(b)).collect()
}
