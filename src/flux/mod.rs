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

    src/flux/mod.rs

    Flux transition storage and the tools used to turn flux into bits.
*/
use std::{
    fmt,
    fmt::{Display, Formatter},
};

pub mod buffer;
pub mod histogram;
#[macro_use]
pub mod pll;

pub use buffer::FluxBuffer;
pub use histogram::FluxHistogram;
pub use pll::{Pll, PllConfig, PllDecodeResult, PllPreset};

#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.4}μs", $value * 1_000_000.0)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! format_ms {
    ($value:expr) => {
        format!("{:.4}ms", $value * 1_000.0)
    };
}

/// Statistics gathered while decoding a flux revolution with the [Pll].
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxStats {
    pub total: u32,
    pub one_cell: u32,
    pub two_cell: u32,
    pub three_cell: u32,
    pub four_cell: u32,
    pub too_short: u32,
    pub too_long: u32,

    pub shortest_flux: f64,
    pub longest_flux:  f64,
}

impl Display for FluxStats {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Total: {} 1C: {} 2C: {} 3C: {} 4C: {} Shortest: {} Longest: {} Too Short: {} Too Long: {}",
            self.total,
            self.one_cell,
            self.two_cell,
            self.three_cell,
            self.four_cell,
            format_us!(self.shortest_flux),
            format_us!(self.longest_flux),
            self.too_short,
            self.too_long
        )
    }
}

impl FluxStats {
    pub(crate) fn record(&mut self, cells: usize, raw_cells: f64, delta: f64) {
        if self.total == 0 || delta < self.shortest_flux {
            self.shortest_flux = delta;
        }
        if delta > self.longest_flux {
            self.longest_flux = delta;
        }
        self.total += 1;
        match cells {
            1 => self.one_cell += 1,
            2 => self.two_cell += 1,
            3 => self.three_cell += 1,
            _ => self.four_cell += 1,
        }
        if raw_cells < 0.5 {
            self.too_short += 1;
        }
        else if raw_cells > cells as f64 + 0.5 {
            self.too_long += 1;
        }
    }
}
