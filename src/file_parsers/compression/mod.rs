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

    src/file_parsers/compression/mod.rs

    Compression codecs used by container formats.
*/

pub mod lz77;

use crate::DiskImageError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompressionError {
    #[error("compressed stream is empty")]
    Empty,
    #[error("compressed stream ends inside a token at offset {0}")]
    Truncated(usize),
    #[error("variable-length integer at offset {0} is too long")]
    VarintOverflow(usize),
    #[error("back-reference at offset {0} has length {1}, longer than any match")]
    BadLength(usize, usize),
    #[error("back-reference at offset {0} reaches {1} bytes back, but only {2} bytes are available")]
    BadOffset(usize, usize, usize),
}

impl From<CompressionError> for DiskImageError {
    fn from(err: CompressionError) -> Self {
        DiskImageError::format(err.to_string())
    }
}
