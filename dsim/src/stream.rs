//! Combined multiple-recursive random-number stream (MRG32k3a).
//!
//! A stream is a point on the generator's lattice together with bookmarks for
//! the stream start (`Ig`), the current substream start (`Bg`), and the
//! current position (`Cg`). Substreams partition a stream into blocks of
//! 2^76 values; the factory separates whole streams by 2^127 steps. All
//! arithmetic is double precision with multiply-and-floor modular reduction;
//! identical seeds produce bit-for-bit identical output on every platform.

use rand::RngCore;

use crate::error::{Error, Result};

const NORM: f64 = 2.328_306_549_295_727_688e-10;
pub(crate) const M1: f64 = 4_294_967_087.0;
pub(crate) const M2: f64 = 4_294_944_443.0;
const A12: f64 = 1_403_580.0;
const A13N: f64 = 810_728.0;
const A21: f64 = 527_612.0;
const A23N: f64 = 1_370_589.0;
const TWO17: f64 = 131_072.0;
const TWO53: f64 = 9_007_199_254_740_992.0;

/// The integer moduli, exposed for seed validation messages.
pub(crate) const MODULUS_1: u64 = 4_294_967_087;
pub(crate) const MODULUS_2: u64 = 4_294_944_443;

/// Transition matrix advancing the first component by 2^76 steps.
const A1_P76: [[f64; 3]; 3] = [
    [82_758_667.0, 1_871_391_091.0, 4_127_413_238.0],
    [3_672_831_523.0, 69_195_019.0, 1_871_391_091.0],
    [3_672_091_415.0, 3_528_743_235.0, 69_195_019.0],
];

/// Transition matrix advancing the second component by 2^76 steps.
const A2_P76: [[f64; 3]; 3] = [
    [1_511_326_704.0, 3_759_209_742.0, 1_610_795_712.0],
    [4_292_754_251.0, 1_511_326_704.0, 3_889_917_532.0],
    [3_859_662_829.0, 4_292_754_251.0, 3_708_466_080.0],
];

/// Transition matrix advancing the first component by 2^127 steps.
pub(crate) const A1_P127: [[f64; 3]; 3] = [
    [2_427_906_178.0, 3_580_155_704.0, 949_770_784.0],
    [226_153_695.0, 1_230_515_664.0, 3_580_155_704.0],
    [1_988_835_001.0, 986_791_581.0, 1_230_515_664.0],
];

/// Transition matrix advancing the second component by 2^127 steps.
pub(crate) const A2_P127: [[f64; 3]; 3] = [
    [1_464_411_153.0, 277_697_599.0, 1_610_723_613.0],
    [32_183_930.0, 1_464_411_153.0, 1_022_607_788.0],
    [2_824_425_944.0, 32_183_930.0, 2_093_834_863.0],
];

/// The seed every factory lineage starts from unless told otherwise.
pub const DEFAULT_SEED: [u64; 6] = [12_345; 6];

/// Computes `(a * s + c) mod m`, assuming `m < 2^35` and `|a| < 2^53`.
///
/// Splits `a` when the product would exceed 2^53 so every intermediate value
/// stays exactly representable in a double.
fn mult_mod(a: f64, s: f64, c: f64, m: f64) -> f64 {
    let mut a = a;
    let mut v = a * s + c;
    if v >= TWO53 || v <= -TWO53 {
        let mut a1 = (a / TWO17).floor();
        a -= a1 * TWO17;
        v = a1 * s;
        a1 = (v / m).floor();
        v -= a1 * m;
        v = v * TWO17 + a * s + c;
    }
    let a1 = (v / m).floor();
    v -= a1 * m;
    if v < 0.0 {
        v + m
    } else {
        v
    }
}

/// Computes `v = A s mod m`, the 3x3 matrix-vector product modulo `m`.
pub(crate) fn mat_vec_mod(a: &[[f64; 3]; 3], s: &[f64; 3], m: f64) -> [f64; 3] {
    let mut x = [0.0_f64; 3];
    for (row, x_i) in a.iter().zip(x.iter_mut()) {
        *x_i = mult_mod(row[0], s[0], 0.0, m);
        *x_i = mult_mod(row[1], s[1], *x_i, m);
        *x_i = mult_mod(row[2], s[2], *x_i, m);
    }
    x
}

/// Checks the seed validity constraints: the first three values must be in
/// `[0, m1)` and not all zero, the last three in `[0, m2)` and not all zero.
pub(crate) fn validate_seed(seed: &[u64; 6]) -> Result<()> {
    for (i, &s) in seed.iter().take(3).enumerate() {
        if s >= MODULUS_1 {
            return Err(Error::InvalidSeed(format!(
                "seed[{}] = {} is not less than m1 = {}",
                i, s, MODULUS_1
            )));
        }
    }
    for (i, &s) in seed.iter().skip(3).enumerate() {
        if s >= MODULUS_2 {
            return Err(Error::InvalidSeed(format!(
                "seed[{}] = {} is not less than m2 = {}",
                i + 3,
                s,
                MODULUS_2
            )));
        }
    }
    if seed[..3].iter().all(|&s| s == 0) {
        return Err(Error::InvalidSeed(String::from(
            "first three seed values must not all be zero",
        )));
    }
    if seed[3..].iter().all(|&s| s == 0) {
        return Err(Error::InvalidSeed(String::from(
            "last three seed values must not all be zero",
        )));
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)] // seed values are < 2^32
pub(crate) fn seed_to_state(seed: &[u64; 6]) -> [f64; 6] {
    let mut state = [0.0_f64; 6];
    for (v, &s) in state.iter_mut().zip(seed.iter()) {
        *v = s as f64;
    }
    state
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // state values are non-negative integers < 2^32
fn state_to_seed(state: &[f64; 6]) -> [u64; 6] {
    let mut seed = [0_u64; 6];
    for (s, &v) in seed.iter_mut().zip(state.iter()) {
        *s = v as u64;
    }
    seed
}

/// A single stream of uniform(0,1) pseudo-random numbers with stream,
/// substream, and antithetic control.
///
/// Streams are usually minted by a [`StreamFactory`](crate::StreamFactory) so
/// that they never overlap; constructing one directly from a seed is for
/// when the caller manages the lineage itself.
#[derive(Debug, Clone)]
pub struct RandomStream {
    /// Current position.
    cg: [f64; 6],
    /// Start of the current substream.
    bg: [f64; 6],
    /// Start of the stream.
    ig: [f64; 6],
    antithetic: bool,
}

impl Default for RandomStream {
    fn default() -> Self {
        Self::from_state(seed_to_state(&DEFAULT_SEED))
    }
}

impl RandomStream {
    /// Creates a stream starting at the given seed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the seed violates the validity
    /// constraints (component out of range, or either half all zero).
    pub fn with_seed(seed: [u64; 6]) -> Result<Self> {
        validate_seed(&seed)?;
        Ok(Self::from_state(seed_to_state(&seed)))
    }

    pub(crate) fn from_state(state: [f64; 6]) -> Self {
        Self {
            cg: state,
            bg: state,
            ig: state,
            antithetic: false,
        }
    }

    /// Returns the next uniform(0,1) value, advancing the state by one step.
    ///
    /// When the antithetic flag is set the complement `1 - u` is returned
    /// instead.
    pub fn rand_u01(&mut self) -> f64 {
        // First component.
        let mut p1 = A12 * self.cg[1] - A13N * self.cg[0];
        let k = (p1 / M1).floor();
        p1 -= k * M1;
        if p1 < 0.0 {
            p1 += M1;
        }
        self.cg[0] = self.cg[1];
        self.cg[1] = self.cg[2];
        self.cg[2] = p1;

        // Second component.
        let mut p2 = A21 * self.cg[5] - A23N * self.cg[3];
        let k = (p2 / M2).floor();
        p2 -= k * M2;
        if p2 < 0.0 {
            p2 += M2;
        }
        self.cg[3] = self.cg[4];
        self.cg[4] = self.cg[5];
        self.cg[5] = p2;

        let u = if p1 > p2 {
            (p1 - p2) * NORM
        } else {
            (p1 - p2 + M1) * NORM
        };
        if self.antithetic {
            1.0 - u
        } else {
            u
        }
    }

    /// Returns a pseudo-random integer uniformly distributed in `[low, high]`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn rand_int(&mut self, low: i64, high: i64) -> i64 {
        debug_assert!(low <= high, "empty range");
        low + (self.rand_u01() * ((high - low + 1) as f64)) as i64
    }

    /// Repositions the state to the start of the stream (`Ig -> Bg -> Cg`).
    pub fn reset_start_stream(&mut self) {
        self.bg = self.ig;
        self.cg = self.ig;
    }

    /// Repositions the state to the start of the current substream
    /// (`Bg -> Cg`).
    pub fn reset_start_substream(&mut self) {
        self.cg = self.bg;
    }

    /// Jumps to the start of the next substream, 2^76 steps past the current
    /// substream start.
    pub fn advance_to_next_substream(&mut self) {
        let (first, second) = split_state(&self.bg);
        let first = mat_vec_mod(&A1_P76, &first, M1);
        let second = mat_vec_mod(&A2_P76, &second, M2);
        self.bg = join_state(&first, &second);
        self.cg = self.bg;
    }

    /// Sets the antithetic flag; when set, [`rand_u01`](Self::rand_u01)
    /// returns complements.
    pub fn set_antithetic(&mut self, antithetic: bool) {
        self.antithetic = antithetic;
    }

    /// Whether the stream currently produces antithetic values.
    #[must_use]
    pub fn is_antithetic(&self) -> bool {
        self.antithetic
    }

    /// Returns an independent copy sharing this stream's current position.
    #[must_use]
    pub fn new_instance(&self) -> Self {
        self.clone()
    }

    /// Returns a copy at the same position with the antithetic flag flipped.
    #[must_use]
    pub fn new_antithetic_instance(&self) -> Self {
        let mut copy = self.clone();
        copy.antithetic = !self.antithetic;
        copy
    }

    /// The current position as a six-integer seed vector.
    #[must_use]
    pub fn state(&self) -> [u64; 6] {
        state_to_seed(&self.cg)
    }

    /// The seed the stream was created from.
    #[must_use]
    pub fn seed(&self) -> [u64; 6] {
        state_to_seed(&self.ig)
    }
}

pub(crate) fn split_state(state: &[f64; 6]) -> ([f64; 3], [f64; 3]) {
    (
        [state[0], state[1], state[2]],
        [state[3], state[4], state[5]],
    )
}

pub(crate) fn join_state(first: &[f64; 3], second: &[f64; 3]) -> [f64; 6] {
    [
        first[0], first[1], first[2], second[0], second[1], second[2],
    ]
}

/// Streams plug into the `rand` ecosystem so that model code can sample
/// `rand_distr` distributions from a replication-managed stream. The 32 top
/// bits are derived from one generator step.
impl RngCore for RandomStream {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn next_u32(&mut self) -> u32 {
        // rand_u01 is in (0,1), so the product is strictly below 2^32.
        (self.rand_u01() * 4_294_967_296.0) as u32
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;
    use rstest::rstest;

    // Reference outputs of the generator from the default seed; the
    // reproducibility contract is bit-for-bit, so these compare exactly.
    const FIRST_DRAWS: [f64; 3] = [
        0.127_011_122_046_577_14,
        0.318_527_565_396_794_5,
        0.309_186_015_583_270_1,
    ];

    #[test]
    fn test_default_seed_regression_pin() {
        let mut stream = RandomStream::default();
        for &expected in &FIRST_DRAWS {
            assert_eq!(stream.rand_u01(), expected);
        }
    }

    #[test]
    fn test_reset_start_stream_is_idempotent() {
        let mut stream = RandomStream::default();
        for _ in 0..17 {
            let _ = stream.rand_u01();
        }
        stream.reset_start_stream();
        let once = stream.rand_u01();
        stream.reset_start_stream();
        stream.reset_start_stream();
        assert_eq!(stream.rand_u01(), once);
        assert_eq!(once, FIRST_DRAWS[0]);
    }

    #[test]
    fn test_reset_start_substream_rewinds_within_substream() {
        let mut stream = RandomStream::default();
        stream.advance_to_next_substream();
        let first = stream.rand_u01();
        let _ = stream.rand_u01();
        stream.reset_start_substream();
        assert_eq!(stream.rand_u01(), first);
        // Pinned first value of the second substream of the default stream.
        assert_eq!(first, 0.079_398_989_797_334_63);
    }

    #[test]
    fn test_antithetic_round_trip() {
        let mut stream = RandomStream::default();
        let mut mirror = stream.new_antithetic_instance();
        for _ in 0..100 {
            let u = stream.rand_u01();
            let v = mirror.rand_u01();
            assert!(approx_eq!(f64, u + v, 1.0, ulps = 4));
        }
    }

    #[test]
    fn test_new_instance_shares_position() {
        let mut stream = RandomStream::default();
        let _ = stream.rand_u01();
        let mut copy = stream.new_instance();
        assert_eq!(stream.rand_u01(), copy.rand_u01());
    }

    #[test]
    fn test_rand_int_stays_in_range() {
        let mut stream = RandomStream::default();
        for _ in 0..1000 {
            let value = stream.rand_int(3, 7);
            assert!((3..=7).contains(&value));
        }
    }

    #[rstest(
        seed,
        case([0, 0, 0, 12_345, 12_345, 12_345]),
        case([12_345, 12_345, 12_345, 0, 0, 0]),
        case([MODULUS_1, 1, 1, 1, 1, 1]),
        case([1, 1, 1, MODULUS_2, 1, 1])
    )]
    fn test_invalid_seeds_are_rejected(seed: [u64; 6]) {
        assert!(matches!(
            RandomStream::with_seed(seed),
            Err(crate::Error::InvalidSeed(_))
        ));
    }

    #[test]
    fn test_valid_seed_is_accepted() {
        let stream = RandomStream::with_seed([1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(stream.seed(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_rng_core_samples_distributions() {
        use rand_distr::{Distribution, Exp};
        let mut stream = RandomStream::default();
        let exponential = Exp::new(2.0).unwrap();
        for _ in 0..100 {
            assert!(exponential.sample(&mut stream) >= 0.0);
        }
    }
}
