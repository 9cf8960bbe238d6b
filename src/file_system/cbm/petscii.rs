/*
    fluxvault
    https://github.com/dbalsom/fluxvault

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/file_system/cbm/petscii.rs

    Conversion between PETSCII file names and ASCII.
*/

//! CBM DOS stores names in PETSCII, padded to 16 bytes with shifted spaces (0xA0). Names are
//! written in the unshifted character set, so both upper and lower case ASCII letters map to the
//! PETSCII range 0x41-0x5A. Matching names is therefore case-insensitive.

pub const NAME_LEN: usize = 16;
pub const PAD_BYTE: u8 = 0xA0;

/// Characters the DOS parser treats as syntax in file names.
const RESERVED: &[char] = &['"', ',', ':', '*', '?', '=', '@'];

pub fn ascii_to_petscii(c: char) -> u8 {
    match c {
        'a'..='z' => c as u8 - b'a' + 0x41,
        'A'..='Z' => c as u8,
        ' '..='@' | '['..=']' => c as u8,
        _ => b'?',
    }
}

pub fn petscii_to_ascii(b: u8) -> char {
    match b {
        0x41..=0x5A => b as char,
        0x61..=0x7A | 0xC1..=0xDA => ((b & 0x1F) + 0x40) as char,
        0xA0 => ' ',
        0x20..=0x40 | 0x5B..=0x5D => b as char,
        _ => '?',
    }
}

/// Convert a padded PETSCII name to ASCII, dropping the padding.
pub fn name_to_ascii(name: &[u8]) -> String {
    let end = name.iter().rposition(|&b| b != PAD_BYTE).map(|i| i + 1).unwrap_or(0);
    name[..end].iter().map(|&b| petscii_to_ascii(b)).collect()
}

/// Convert an ASCII name to a padded PETSCII name. Returns `None` if the name is empty, too
/// long, or contains characters the DOS would parse as syntax.
pub fn name_to_petscii(name: &str) -> Option<[u8; NAME_LEN]> {
    if name.is_empty() || name.chars().count() > NAME_LEN || name.contains(RESERVED) {
        return None;
    }
    let mut out = [PAD_BYTE; NAME_LEN];
    for (dst, c) in out.iter_mut().zip(name.chars()) {
        *dst = ascii_to_petscii(c);
    }
    Some(out)
}

/// Compare an ASCII name against a stored PETSCII name.
pub fn name_matches(stored: &[u8], name: &str) -> bool {
    match name_to_petscii(name) {
        Some(petscii) => name_to_ascii(stored) == name_to_ascii(&petscii),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_conversion() {
        let name = name_to_petscii("Hello 64").unwrap();
        assert_eq!(&name[..8], &[0x48, 0x45, 0x4C, 0x4C, 0x4F, 0x20, 0x36, 0x34]);
        assert_eq!(name[8], PAD_BYTE);
        assert_eq!(name_to_ascii(&name), "HELLO 64");
        assert!(name_matches(&name, "hello 64"));
        assert_eq!(petscii_to_ascii(0xC1), 'A');
        assert_eq!(petscii_to_ascii(0x01), '?');
    }

    #[test]
    fn test_invalid_names() {
        assert!(name_to_petscii("").is_none());
        assert!(name_to_petscii("A:B").is_none());
        assert!(name_to_petscii("THIS NAME IS TOO LONG").is_none());
    }
}
