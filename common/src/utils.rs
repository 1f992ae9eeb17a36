//! Common Utilities
//!
//! Power unit conversions, a fast-start exponential averager and a
//! capacity-bounded bitset used for per-UE bookkeeping.

use num_traits::Float;
use std::ops::BitOr;
use tracing::trace;

/// Convert a linear power ratio to dB
pub fn convert_power_to_db(value: f32) -> f32 {
    10.0 * value.log10()
}

/// Convert a dB value to a linear power ratio
pub fn convert_db_to_power(value_db: f32) -> f32 {
    10f32.powf(value_db / 10.0)
}

/// Exponential moving average that behaves as a plain mean over its first samples.
///
/// Until `start_size` samples have been pushed, the average is the arithmetic mean of
/// all samples seen, which avoids the slow ramp-up of an EMA initialised at zero.
#[derive(Debug, Clone)]
pub struct ExpAverageFastStart<T: Float> {
    avg: T,
    alpha: T,
    count: u32,
    start_size: u32,
}

impl<T: Float> ExpAverageFastStart<T> {
    /// Create an averager whose fast-start phase lasts `1/alpha` samples
    pub fn new(alpha: T) -> Self {
        let start = (T::one() / alpha).to_u32().unwrap_or(1);
        Self::with_start_size(alpha, start)
    }

    pub fn with_start_size(alpha: T, start_size: u32) -> Self {
        assert!(alpha > T::zero() && alpha < T::one(), "Alpha must be higher than 0 and less than 1");
        assert!(start_size > 0, "Start size must be greater than 0");
        Self {
            avg: T::zero(),
            alpha,
            count: 0,
            start_size,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.count < self.start_size {
            self.avg = self.avg + (sample - self.avg) / count_as::<T>(self.count + 1);
            self.count += 1;
        } else {
            self.avg = (T::one() - self.alpha) * self.avg + self.alpha * sample;
        }
    }

    /// Equivalent to pushing `n` zero samples
    pub fn push_zeros(&mut self, mut n: u32) {
        if self.count < self.start_size {
            let rem = (self.start_size - self.count).min(n);
            for _ in 0..rem {
                self.avg = self.avg - self.avg / count_as::<T>(self.count + 1);
                self.count += 1;
            }
            n -= rem;
        }
        if n > 0 {
            self.avg = (T::one() - self.alpha).powi(n as i32) * self.avg;
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.avg = T::zero();
    }

    pub fn average(&self) -> T {
        self.avg
    }

    pub fn set_alpha(&mut self, alpha: T) {
        assert!(alpha > T::zero() && alpha < T::one(), "Alpha must be higher than 0 and less than 1");
        self.alpha = alpha;
    }

    pub fn alpha(&self) -> T {
        self.alpha
    }

    /// Whether the fast-start phase is over
    pub fn is_exp_average_mode(&self) -> bool {
        self.count >= self.start_size
    }
}

fn count_as<T: Float>(n: u32) -> T {
    T::from(n).unwrap_or_else(T::one)
}

/// Bitset with a runtime size that never exceeds the compile-time capacity `N`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundedBitset<const N: usize> {
    words: Vec<u64>,
    size: usize,
}

impl<const N: usize> BoundedBitset<N> {
    /// Create a bitset of `size` cleared bits
    pub fn new(size: usize) -> Self {
        assert!(size <= N, "Bitset size {} exceeds capacity {}", size, N);
        Self {
            words: vec![0; size.div_ceil(64)],
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Change the number of bits. Bits beyond the new size are dropped.
    pub fn resize(&mut self, new_size: usize) {
        assert!(new_size <= N, "Bitset size {} exceeds capacity {}", new_size, N);
        if new_size < self.size {
            for pos in new_size..self.size {
                self.reset(pos);
            }
        }
        self.words.resize(new_size.div_ceil(64), 0);
        trace!("Bitset resized from {} to {}", self.size, new_size);
        self.size = new_size;
    }

    pub fn test(&self, pos: usize) -> bool {
        assert!(pos < self.size, "Bit position {} out of bounds {}", pos, self.size);
        self.words[pos / 64] & (1u64 << (pos % 64)) != 0
    }

    pub fn set(&mut self, pos: usize) {
        self.set_to(pos, true);
    }

    pub fn reset(&mut self, pos: usize) {
        self.set_to(pos, false);
    }

    pub fn set_to(&mut self, pos: usize, value: bool) {
        assert!(pos < self.size, "Bit position {} out of bounds {}", pos, self.size);
        let mask = 1u64 << (pos % 64);
        if value {
            self.words[pos / 64] |= mask;
        } else {
            self.words[pos / 64] &= !mask;
        }
    }

    /// Whether `pos` is inside the bitset and set
    pub fn contains(&self, pos: usize) -> bool {
        pos < self.size && self.test(pos)
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn none(&self) -> bool {
        !self.any()
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Highest set bit position
    pub fn find_highest(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * 64 + 63 - w.leading_zeros() as usize)
    }

    /// Iterate over the positions of set bits in increasing order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let mut word = w;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                Some(i * 64 + bit)
            })
        })
    }
}

impl<const N: usize> BitOr<&BoundedBitset<N>> for &BoundedBitset<N> {
    type Output = BoundedBitset<N>;

    fn bitor(self, rhs: &BoundedBitset<N>) -> BoundedBitset<N> {
        let size = self.size.max(rhs.size);
        let mut out = BoundedBitset::new(size);
        for (i, w) in out.words.iter_mut().enumerate() {
            *w = self.words.get(i).copied().unwrap_or(0) | rhs.words.get(i).copied().unwrap_or(0);
        }
        out
    }
}
