//! Legacy text decoding.

use std::{borrow::Cow, ffi::CStr};

use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

/// Decodes a string that is either Shift-JIS or Windows-1252.
///
/// Shift-JIS is tried first. If the bytes are not valid Shift-JIS, they are decoded
/// as Windows-1252, which never fails.
pub fn cp1252_sjis_to_utf8(bytes: &[u8]) -> Cow<'_, str> {
    if let Some(s) = SHIFT_JIS.decode_without_bom_handling_and_without_replacement(bytes) {
        return s;
    }
    WINDOWS_1252.decode_without_bom_handling(bytes).0
}

/// Decodes a Shift-JIS string, replacing invalid sequences with U+FFFD.
pub fn sjis_to_utf8(bytes: &[u8]) -> Cow<'_, str> {
    SHIFT_JIS.decode_without_bom_handling(bytes).0
}

/// Decodes a Windows-1252 string.
pub fn cp1252_to_utf8(bytes: &[u8]) -> Cow<'_, str> {
    WINDOWS_1252.decode_without_bom_handling(bytes).0
}

/// Returns the bytes of a fixed-size field up to the first NUL, or the whole field if
/// it has none.
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    match CStr::from_bytes_until_nul(bytes) {
        Ok(c) => c.to_bytes(),
        Err(_) => bytes,
    }
}

/// Trims trailing NULs and spaces from a fixed-size field.
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    let len = bytes.iter().rposition(|&b| b != 0 && b != b' ').map_or(0, |i| i + 1);
    &bytes[..len]
}
