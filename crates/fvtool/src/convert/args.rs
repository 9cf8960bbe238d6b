/*
    fvtool
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

    src/convert/args.rs

    Arguments for the convert command.
*/
use crate::args::*;
use bpaf::{construct, long, Parser};
use fluxvault::{format_from_ext, DiskImageFileFormat};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ConvertParams {
    pub in_file: PathBuf,
    pub out_file: PathBuf,
    /// Output format, overriding the output file's extension.
    pub format: Option<DiskImageFileFormat>,
}

fn format_parser() -> impl Parser<Option<DiskImageFileFormat>> {
    long("format")
        .short('f')
        .argument::<String>("FORMAT")
        .help("Output format given as a file extension, such as d64, g64, nib, nbz, dmk or raw")
        .parse(|ext| format_from_ext(&ext).ok_or("Unknown output format"))
        .optional()
}

pub fn convert_parser() -> impl Parser<ConvertParams> {
    let in_file = in_file_parser();
    let out_file = out_file_parser();
    let format = format_parser();

    construct!(ConvertParams {
        in_file,
        out_file,
        format
    })
}
