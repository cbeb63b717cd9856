use std::f64::consts::TAU;
use std::ops::RangeInclusive;

/// Deterministic generator used by world generation.
///
/// `xoshiro256**` seeded through SplitMix64, so a galaxy seed always
/// produces the same layout, names and ids.
#[derive(Clone, Copy, Debug)]
pub struct GameRng {
    state: [u64; 4],
}

impl GameRng {
    pub fn seed_from_u64(seed: u64) -> Self {
        let mut sm = SplitMix64 { state: seed };
        Self {
            state: [sm.next(), sm.next(), sm.next(), sm.next()],
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = self.state[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;

        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);

        result
    }

    /// Uniform in [0.0, 1.0), 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Uniform angle in radians.
    pub fn angle(&mut self) -> f64 {
        self.next_f64() * TAU
    }

    /// Uniform integer in an inclusive range, without modulo bias.
    pub fn range_u32(&mut self, range: RangeInclusive<u32>) -> u32 {
        let (start, end) = (*range.start(), *range.end());
        if start >= end {
            return start;
        }
        let span = u64::from(end - start) + 1;
        let threshold = u64::MAX - (u64::MAX % span);
        loop {
            let x = self.next_u64();
            if x < threshold {
                return start + (x % span) as u32;
            }
        }
    }

    pub fn index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        self.range_u32(0..=(len.saturating_sub(1)) as u32) as usize
    }

    pub fn bytes16(&mut self) -> [u8; 16] {
        let mut out = [0_u8; 16];
        out[..8].copy_from_slice(&self.next_u64().to_le_bytes());
        out[8..].copy_from_slice(&self.next_u64().to_le_bytes());
        out
    }
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}
