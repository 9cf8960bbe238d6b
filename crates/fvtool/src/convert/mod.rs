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

    src/convert/mod.rs

    The convert command.
*/
pub mod args;

use crate::{args::GlobalOptions, pipeline};
use anyhow::Error;

pub fn run(global: &GlobalOptions, params: &args::ConvertParams) -> Result<(), Error> {
    let mut pipeline = pipeline(global, 1)?;
    pipeline.convert(&params.in_file, &params.out_file, params.format)?;
    if !global.silent {
        println!(
            "Converted {} to {}",
            params.in_file.display(),
            params.out_file.display()
        );
    }
    Ok(())
}
