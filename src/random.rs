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

    src/random.rs

    A xorshift32 generator for weak-bit emulation.
*/

//! Weak bits read back differently on each revolution. When a track carrying a weak-bit mask is
//! encoded for writing or emulation, the masked bits are replaced with the output of a
//! [WeakBitRng]. The generator is a plain value; each pipeline owns its own, so output is
//! reproducible for a given seed.

/// The seed used when none is supplied, or when a zero seed is supplied.
pub const DEFAULT_WEAK_SEED: u32 = 0x57A8_57FA;

#[derive(Clone, Debug)]
pub struct WeakBitRng {
    state: u32,
}

impl Default for WeakBitRng {
    fn default() -> Self {
        WeakBitRng::new(DEFAULT_WEAK_SEED)
    }
}

impl WeakBitRng {
    /// Create a generator with the given seed. xorshift cannot leave the all-zeros state, so a
    /// zero seed is replaced with [DEFAULT_WEAK_SEED].
    pub fn new(seed: u32) -> Self {
        WeakBitRng {
            state: if seed == 0 { DEFAULT_WEAK_SEED } else { seed },
        }
    }

    /// Create a generator seeded from the thread RNG.
    #[cfg(feature = "rand")]
    pub fn from_entropy() -> Self {
        WeakBitRng::new(rand::random::<u32>())
    }

    pub fn reseed(&mut self, seed: u32) {
        *self = WeakBitRng::new(seed);
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    pub fn next_u8(&mut self) -> u8 {
        (self.next_u32() >> 24) as u8
    }

    pub fn next_bit(&mut self) -> bool {
        self.next_u32() & 0x8000_0000 != 0
    }

    /// Replace the bits of `byte` selected by `mask` with random bits.
    pub fn scramble(&mut self, byte: u8, mask: u8) -> u8 {
        if mask == 0 {
            return byte;
        }
        (byte & !mask) | (self.next_u8() & mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xorshift_sequence() {
        let mut rng = WeakBitRng::new(1);
        // Reference values for xorshift32 (13, 17, 5) from a seed of 1.
        assert_eq!(rng.next_u32(), 270369);
        assert_eq!(rng.next_u32(), 67634689);
    }

    #[test]
    fn test_zero_seed_replaced() {
        let mut a = WeakBitRng::new(0);
        let mut b = WeakBitRng::default();
        assert_eq!(a.next_u32(), b.next_u32());
    }

    #[test]
    fn test_scramble_preserves_unmasked() {
        let mut rng = WeakBitRng::default();
        for _ in 0..64 {
            assert_eq!(rng.scramble(0xA5, 0x0F) & 0xF0, 0xA0);
        }
        assert_eq!(rng.scramble(0x5A, 0), 0x5A);
    }
}
