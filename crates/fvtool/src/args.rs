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

    src/args.rs

    Command line argument definitions.
*/
use bpaf::*;
use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

use crate::{
    capture::args::{read_disk_parser, read_track_parser, ReadDiskParams, ReadTrackParams},
    convert::args::{convert_parser, ConvertParams},
    fs::args::{delete_parser, extract_parser, inject_parser, ls_parser, DeleteParams, ExtractParams, InjectParams, LsParams},
    validate::args::{image_parser, ImageParams},
};
use fluxvault::TrackDataEncoding;

/// Track encoding as given on the command line.
#[derive(Debug, Clone, Copy)]
pub struct EncodingArg(pub TrackDataEncoding);

impl FromStr for EncodingArg {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "fm" => Ok(EncodingArg(TrackDataEncoding::Fm)),
            "mfm" => Ok(EncodingArg(TrackDataEncoding::Mfm)),
            "gcr" | "cbm" => Ok(EncodingArg(TrackDataEncoding::GcrCbm)),
            _ => Err("Invalid encoding; expected 'fm', 'mfm' or 'gcr'"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Command {
    Version,
    ReadTrack(ReadTrackParams),
    ReadDisk(ReadDiskParams),
    Convert(ConvertParams),
    Ls(LsParams),
    Extract(ExtractParams),
    Inject(InjectParams),
    Delete(DeleteParams),
    Validate(ImageParams),
    Analyze(ImageParams),
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            Command::Version => "version",
            Command::ReadTrack(_) => "read-track",
            Command::ReadDisk(_) => "read-disk",
            Command::Convert(_) => "convert",
            Command::Ls(_) => "ls",
            Command::Extract(_) => "extract",
            Command::Inject(_) => "inject",
            Command::Delete(_) => "delete",
            Command::Validate(_) => "validate",
            Command::Analyze(_) => "analyze",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub struct AppParams {
    pub global: GlobalOptions,
    pub command: Command,
}

#[derive(Debug)]
pub struct GlobalOptions {
    pub silent: bool,
    /// Adapter to prefer for capture and conversion.
    pub tool: Option<String>,
    pub retries: u8,
}

pub fn global_options_parser() -> impl Parser<GlobalOptions> {
    let silent = long("silent")
        .help("Suppress all output except required output")
        .switch();
    let tool = long("tool")
        .argument::<String>("TOOL")
        .help("Prefer the named adapter (greaseweazle, fluxengine, kryoflux-dtc, xum1541, analysis)")
        .optional();
    let retries = long("retries")
        .argument::<u8>("RETRIES")
        .help("Number of re-reads for tracks with bad sectors")
        .fallback(3);

    construct!(GlobalOptions { silent, tool, retries })
}

pub fn in_file_parser() -> impl Parser<PathBuf> {
    long("in_file")
        .short('i')
        .argument::<PathBuf>("IN_FILE")
        .help("Path to input file")
}

pub fn out_file_parser() -> impl Parser<PathBuf> {
    long("out_file")
        .short('o')
        .argument::<PathBuf>("OUT_FILE")
        .help("Path to output file")
}

pub fn cylinder_parser() -> impl Parser<u16> {
    long("cylinder")
        .short('c')
        .argument::<u16>("CYLINDER")
        .help("Specify the cylinder number")
}

pub fn head_parser() -> impl Parser<u8> {
    long("head")
        .short('h')
        .argument::<u8>("HEAD")
        .help("Specify the head number")
        .guard(|&head| head == 0 || head == 1, "Head must be either 0 or 1")
}

pub fn revs_parser() -> impl Parser<u8> {
    long("revs")
        .short('r')
        .argument::<u8>("REVOLUTIONS")
        .help("Number of revolutions to capture per read")
        .guard(|&revs| revs >= 1, "At least one revolution is required")
        .fallback(2)
}

pub fn encoding_parser() -> impl Parser<Option<TrackDataEncoding>> {
    long("encoding")
        .short('e')
        .argument::<EncodingArg>("ENCODING")
        .help("Track encoding: fm, mfm or gcr. Detected if not given")
        .map(|e| e.0)
        .optional()
}

pub fn name_parser() -> impl Parser<String> {
    long("name")
        .short('n')
        .argument::<String>("NAME")
        .help("Name of the file on the disk image")
}

pub fn command_parser() -> impl Parser<AppParams> {
    let global = global_options_parser();

    let version = pure(Command::Version)
        .to_options()
        .command("version")
        .help("Display version information and exit");
    let read_track = construct!(Command::ReadTrack(read_track_parser()))
        .to_options()
        .command("read-track")
        .help("Capture and decode a single track");
    let read_disk = construct!(Command::ReadDisk(read_disk_parser()))
        .to_options()
        .command("read-disk")
        .help("Capture a whole disk to an image file");
    let convert = construct!(Command::Convert(convert_parser()))
        .to_options()
        .command("convert")
        .help("Convert a disk image to another format");
    let ls = construct!(Command::Ls(ls_parser()))
        .to_options()
        .command("ls")
        .help("List the files on a disk image");
    let extract = construct!(Command::Extract(extract_parser()))
        .to_options()
        .command("extract")
        .help("Copy a file out of a disk image");
    let inject = construct!(Command::Inject(inject_parser()))
        .to_options()
        .command("inject")
        .help("Copy a file into a disk image");
    let delete = construct!(Command::Delete(delete_parser()))
        .to_options()
        .command("delete")
        .help("Delete a file from a disk image");
    let validate = construct!(Command::Validate(image_parser()))
        .to_options()
        .command("validate")
        .help("Check sectors and filesystem structure of a disk image");
    let analyze = construct!(Command::Analyze(image_parser()))
        .to_options()
        .command("analyze")
        .help("Report per-track timing analysis and copy protection");

    let command = construct!([version, read_track, read_disk, convert, ls, extract, inject, delete, validate, analyze]);

    construct!(AppParams { global, command })
}
