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

    src/capture/args.rs

    Arguments for the read-track and read-disk commands.
*/
use crate::args::*;
use bpaf::{construct, long, Parser};
use fluxvault::TrackDataEncoding;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ReadTrackParams {
    pub cylinder: u16,
    pub head: u8,
    pub revs: u8,
    pub encoding: Option<TrackDataEncoding>,
    /// Save the decoded track as a single-track image.
    pub out_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ReadDiskParams {
    pub cylinders: u16,
    pub heads: u8,
    pub revs: u8,
    pub encoding: Option<TrackDataEncoding>,
    pub half_tracks: bool,
    pub out_file: PathBuf,
}

pub fn read_track_parser() -> impl Parser<ReadTrackParams> {
    let cylinder = cylinder_parser();
    let head = head_parser().fallback(0);
    let revs = revs_parser();
    let encoding = encoding_parser();
    let out_file = out_file_parser().optional();

    construct!(ReadTrackParams {
        cylinder,
        head,
        revs,
        encoding,
        out_file
    })
}

pub fn read_disk_parser() -> impl Parser<ReadDiskParams> {
    let cylinders = long("cylinders")
        .argument::<u16>("CYLINDERS")
        .help("Number of cylinders to read")
        .guard(|&c| (1..=84).contains(&c), "Cylinders must be between 1 and 84")
        .fallback(35);
    let heads = long("heads")
        .argument::<u8>("HEADS")
        .help("Number of heads to read")
        .guard(|&h| h == 1 || h == 2, "Heads must be either 1 or 2")
        .fallback(1);
    let revs = revs_parser();
    let encoding = encoding_parser();
    let half_tracks = long("half-tracks")
        .help("Also read the half-step position after each cylinder")
        .switch();
    let out_file = out_file_parser();

    construct!(ReadDiskParams {
        cylinders,
        heads,
        revs,
        encoding,
        half_tracks,
        out_file
    })
}
