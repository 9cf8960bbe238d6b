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

    src/types/buffers.rs

    Distinct byte buffer types for track, sector and container data.
*/

//! Raw bytes move through the library in three distinct roles. Each role gets its own type so
//! that a container file can never be mistaken for a track, or a track for a sector. Conversions
//! between them are always explicit.

macro_rules! byte_buffer {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn new() -> Self {
                Self(Vec::new())
            }
            pub fn with_capacity(capacity: usize) -> Self {
                Self(Vec::with_capacity(capacity))
            }
            pub fn zeroed(len: usize) -> Self {
                Self(vec![0; len])
            }
            pub fn filled(len: usize, value: u8) -> Self {
                Self(vec![value; len])
            }
            pub fn len(&self) -> usize {
                self.0.len()
            }
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }
            pub fn as_mut_slice(&mut self) -> &mut [u8] {
                &mut self.0
            }
            pub fn into_inner(self) -> Vec<u8> {
                self.0
            }
            pub fn push(&mut self, byte: u8) {
                self.0.push(byte)
            }
            pub fn extend_from_slice(&mut self, bytes: &[u8]) {
                self.0.extend_from_slice(bytes)
            }
            pub fn resize(&mut self, len: usize, value: u8) {
                self.0.resize(len, value)
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl From<&[u8]> for $name {
            fn from(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

byte_buffer!(
    /// Bytes of a physical track after bit-to-byte conversion, including gaps, syncs and marks.
    TrackBytes
);
byte_buffer!(
    /// The decoded payload of a single sector.
    SectorBytes
);
byte_buffer!(
    /// The serialized contents of a container file.
    ContainerBytes
);

impl ContainerBytes {
    /// Return a seekable reader over the container bytes, for use with parsers.
    pub fn reader(&self) -> std::io::Cursor<&[u8]> {
        std::io::Cursor::new(self.0.as_slice())
    }
}
