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

    src/fs/args.rs

    Arguments for the filesystem commands.
*/
use crate::args::*;
use bpaf::{construct, long, Parser};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct LsParams {
    pub in_file: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ExtractParams {
    pub in_file: PathBuf,
    pub name: String,
    pub out_file: PathBuf,
}

#[derive(Clone, Debug)]
pub struct InjectParams {
    pub in_file: PathBuf,
    pub name: String,
    /// Host file to copy onto the image.
    pub source: PathBuf,
    /// Where to write the modified image. The input is overwritten if not given.
    pub out_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct DeleteParams {
    pub in_file: PathBuf,
    pub name: String,
    pub out_file: Option<PathBuf>,
}

pub fn ls_parser() -> impl Parser<LsParams> {
    let in_file = in_file_parser();
    construct!(LsParams { in_file })
}

pub fn extract_parser() -> impl Parser<ExtractParams> {
    let in_file = in_file_parser();
    let name = name_parser();
    let out_file = out_file_parser();

    construct!(ExtractParams { in_file, name, out_file })
}

pub fn inject_parser() -> impl Parser<InjectParams> {
    let in_file = in_file_parser();
    let name = name_parser();
    let source = long("source")
        .short('s')
        .argument::<PathBuf>("SOURCE")
        .help("Path to the host file to copy onto the image");
    let out_file = out_file_parser().optional();

    construct!(InjectParams {
        in_file,
        name,
        source,
        out_file
    })
}

pub fn delete_parser() -> impl Parser<DeleteParams> {
    let in_file = in_file_parser();
    let name = name_parser();
    let out_file = out_file_parser().optional();

    construct!(DeleteParams { in_file, name, out_file })
}
