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

    src/validate/mod.rs

    The validate and analyze commands.
*/
pub mod args;

use crate::{args::GlobalOptions, load_image, pipeline, ValidationFailed};
use anyhow::Error;
use fluxvault::hardware::analysis::DiskAnalysis;

pub fn run_validate(global: &GlobalOptions, params: &args::ImageParams) -> Result<(), Error> {
    let image = load_image(global, &params.in_file)?;
    let pipeline = pipeline(global, 1)?;

    let report = pipeline.validate(&image)?;
    println!("{}", report);
    if report.passed() {
        Ok(())
    }
    else {
        let problems = report.sector_failures.len() + report.fs_findings.len() + usize::from(!report.complete);
        Err(ValidationFailed(problems.max(1)).into())
    }
}

pub fn run_analyze(global: &GlobalOptions, params: &args::ImageParams) -> Result<(), Error> {
    let image = load_image(global, &params.in_file)?;
    println!("{}", DiskAnalysis::of(&image));
    Ok(())
}
