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

    src/capture/mod.rs

    The read-track and read-disk commands.
*/
pub mod args;

use crate::{args::GlobalOptions, pipeline};
use anyhow::Error;
use fluxvault::{
    hardware::{CaptureCallback, CaptureStatus, DiskRequest},
    pipeline::Pipeline,
    DiskCh,
    DiskImage,
    DiskMetadata,
    TrackKey,
};
use std::{io::Write, sync::Arc};

pub fn run_track(global: &GlobalOptions, params: &args::ReadTrackParams) -> Result<(), Error> {
    let mut pipeline = pipeline(global, params.revs)?;
    let key = TrackKey::new(params.cylinder, params.head, false);

    let track = pipeline.capture_track(key)?;
    if !global.silent {
        println!(
            "Track {}: {}, cell {:.0}ns, {} sectors ({} bad)",
            track.key,
            track.encoding,
            track.cell_ns,
            track.sectors.len(),
            track.failed_sectors().count()
        );
        for sector in &track.sectors {
            println!("  {}", sector);
        }
        if let Some(latency) = &track.latency {
            println!("{}", latency);
        }
    }

    if let Some(out_file) = &params.out_file {
        let mut image = DiskImage::new(DiskMetadata::default());
        image.insert_track(track);
        let written = Pipeline::save(&mut image, out_file, None)?;
        if !global.silent {
            println!("Wrote {} file(s) to {}", written.len(), out_file.display());
        }
    }
    Ok(())
}

pub fn run_disk(global: &GlobalOptions, params: &args::ReadDiskParams) -> Result<(), Error> {
    let mut pipeline = pipeline(global, params.revs)?;
    if !global.silent {
        let callback: CaptureCallback = Arc::new(|status: CaptureStatus| {
            match status {
                CaptureStatus::Track(key) => {
                    print!("\rReading {}...   ", key);
                    let _ = std::io::stdout().flush();
                }
                CaptureStatus::Complete => println!("\rCapture complete.      "),
                CaptureStatus::Progress(_) => {}
            }
            true
        });
        pipeline.set_callback(Some(callback));
    }

    let request = DiskRequest {
        geometry: DiskCh::new(params.cylinders, params.heads),
        revolutions: params.revs,
        encoding: params.encoding,
        half_tracks: params.half_tracks,
    };
    let mut outcome = pipeline.capture_disk(&request)?;

    if !global.silent {
        println!(
            "Captured {} tracks, {} sectors ({} skipped tracks)",
            outcome.image.track_ct(),
            outcome.image.sector_ct(),
            outcome.skipped.len()
        );
        for key in &outcome.skipped {
            println!("  no data on {}", key);
        }
    }

    if outcome.image.track_ct() > 0 {
        let written = Pipeline::save(&mut outcome.image, &params.out_file, None)?;
        if !global.silent {
            println!("Wrote {} file(s) to {}", written.len(), params.out_file.display());
        }
    }

    match outcome.error {
        Some(e) => {
            eprintln!("Capture incomplete; the saved image contains only the tracks read.");
            Err(e.into())
        }
        None => Ok(()),
    }
}
