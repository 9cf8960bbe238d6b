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

    src/fs/mod.rs

    The ls, extract, inject and delete commands.
*/
pub mod args;

use crate::{args::GlobalOptions, load_image};
use anyhow::{Context, Error};
use fluxvault::{file_system::cbm::CbmFileSystem, pipeline::Pipeline, DiskImage};
use std::path::Path;

pub fn run_ls(global: &GlobalOptions, params: &args::LsParams) -> Result<(), Error> {
    let image = load_image(global, &params.in_file)?;

    // CBM volumes print the way the drive lists them.
    if let Ok(fs) = CbmFileSystem::mount(&image) {
        print!("{}", fs.listing()?);
        return Ok(());
    }

    let entries = Pipeline::fs_list(&image)?;
    for entry in &entries {
        println!("{}", entry);
    }
    if !global.silent {
        println!("{} file(s)", entries.len());
    }
    Ok(())
}

pub fn run_extract(global: &GlobalOptions, params: &args::ExtractParams) -> Result<(), Error> {
    let image = load_image(global, &params.in_file)?;
    let data = Pipeline::fs_extract(&image, &params.name)?;

    std::fs::write(&params.out_file, &data)
        .with_context(|| format!("Writing {}", params.out_file.display()))?;
    if !global.silent {
        println!(
            "Extracted {} ({} bytes) to {}",
            params.name,
            data.len(),
            params.out_file.display()
        );
    }
    Ok(())
}

pub fn run_inject(global: &GlobalOptions, params: &args::InjectParams) -> Result<(), Error> {
    let data = std::fs::read(&params.source).with_context(|| format!("Reading {}", params.source.display()))?;
    let mut image = load_image(global, &params.in_file)?;

    Pipeline::fs_inject(&mut image, &params.name, &data)?;
    let out_file = params.out_file.as_deref().unwrap_or(&params.in_file);
    save_image(global, &mut image, out_file)?;
    if !global.silent {
        println!("Injected {} ({} bytes)", params.name, data.len());
    }
    Ok(())
}

pub fn run_delete(global: &GlobalOptions, params: &args::DeleteParams) -> Result<(), Error> {
    let mut image = load_image(global, &params.in_file)?;

    Pipeline::fs_delete(&mut image, &params.name)?;
    let out_file = params.out_file.as_deref().unwrap_or(&params.in_file);
    save_image(global, &mut image, out_file)?;
    if !global.silent {
        println!("Deleted {}", params.name);
    }
    Ok(())
}

/// Save back in the image's source format, falling back to the path's extension.
fn save_image(global: &GlobalOptions, image: &mut DiskImage, path: &Path) -> Result<(), Error> {
    let format = image.source_format;
    let written = Pipeline::save(image, path, format)?;
    if !global.silent {
        for file in written {
            println!("Wrote {}", file.display());
        }
    }
    Ok(())
}
