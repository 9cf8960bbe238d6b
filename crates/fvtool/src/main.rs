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
*/

pub mod args;
pub mod capture;
pub mod convert;
pub mod fs;
pub mod validate;

use anyhow::Error;
use bpaf::Parser;
use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

use crate::args::{Command, GlobalOptions};
use args::command_parser;
use fluxvault::{
    pipeline::{Pipeline, PipelineConfig},
    DiskImage,
    DiskImageError,
    EXIT_VALIDATION_FAILURE,
};

/// Returned by `validate` when the image has problems.
#[derive(Debug)]
pub struct ValidationFailed(pub usize);

impl Display for ValidationFailed {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "validation found {} problem(s)", self.0)
    }
}

impl std::error::Error for ValidationFailed {}

fn main() {
    env_logger::init();

    let app_params = command_parser().run();

    let command_result = match &app_params.command {
        Command::Version => {
            println!("fvtool v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::ReadTrack(params) => capture::run_track(&app_params.global, params),
        Command::ReadDisk(params) => capture::run_disk(&app_params.global, params),
        Command::Convert(params) => convert::run(&app_params.global, params),
        Command::Ls(params) => fs::run_ls(&app_params.global, params),
        Command::Extract(params) => fs::run_extract(&app_params.global, params),
        Command::Inject(params) => fs::run_inject(&app_params.global, params),
        Command::Delete(params) => fs::run_delete(&app_params.global, params),
        Command::Validate(params) => validate::run_validate(&app_params.global, params),
        Command::Analyze(params) => validate::run_analyze(&app_params.global, params),
    };

    if let Err(e) = command_result {
        eprintln!("Command '{}' failed: {}", app_params.command, e);
        for cause in e.chain().skip(1) {
            eprintln!("Caused by: {}", cause);
        }
        std::process::exit(exit_code(&e));
    }
}

/// Map a failure to the process exit code for its error kind.
fn exit_code(e: &Error) -> i32 {
    if e.downcast_ref::<ValidationFailed>().is_some() {
        return EXIT_VALIDATION_FAILURE;
    }
    match e.downcast_ref::<DiskImageError>() {
        Some(err) => err.exit_code(),
        None if e.downcast_ref::<std::io::Error>().is_some() => 2,
        None => 1,
    }
}

pub fn pipeline(global: &GlobalOptions, revolutions: u8) -> Result<Pipeline, DiskImageError> {
    Pipeline::new(PipelineConfig {
        retries: global.retries,
        revolutions,
        preferred_tool: global.tool.clone(),
        ..PipelineConfig::default()
    })
}

pub fn load_image(global: &GlobalOptions, path: &Path) -> Result<DiskImage, DiskImageError> {
    let image = Pipeline::open(path)?;
    if !global.silent {
        match image.source_format {
            Some(format) => println!("Loaded {} image: {}", format, path.display()),
            None => println!("Loaded image: {}", path.display()),
        }
    }
    Ok(image)
}
