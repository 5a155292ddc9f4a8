//! 256-bit proof-of-work targets and their human-scale difficulty.
//!
//! A target is stored big-endian so that byte-wise ordering equals numeric
//! ordering. A smaller target is a harder one.
use num::{BigInt, BigRational, BigUint, Zero};
use num_traits::ToPrimitive;
use std::fmt;

/// Size of a target in bytes.
pub const TARGET_SIZE: usize = 32;

const fn difficulty_one_bytes() -> [u8; TARGET_SIZE] {
    let mut bytes = [0u8; TARGET_SIZE];
    bytes[4] = 0xff;
    bytes[5] = 0xff;
    bytes
}

/// Reference target of difficulty 1, `0x00000000ffff0000…00`.
pub const DIFFICULTY_ONE_TARGET: Target = Target(difficulty_one_bytes());

/// The easiest possible target, every bit set.
pub const ROOT_DEPTH: Target = Target([0xff; TARGET_SIZE]);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(pub [u8; TARGET_SIZE]);

impl Target {
    /// Parses a target from exactly 64 hex characters (big-endian).
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; TARGET_SIZE];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Target(bytes))
    }

    /// Builds a target from an integer, saturating at [`ROOT_DEPTH`].
    pub fn from_biguint(value: &BigUint) -> Self {
        let bytes = value.to_bytes_be();
        if bytes.len() > TARGET_SIZE {
            return ROOT_DEPTH;
        }
        let mut target = [0u8; TARGET_SIZE];
        target[TARGET_SIZE - bytes.len()..].copy_from_slice(&bytes);
        Target(target)
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    pub fn to_rational(&self) -> BigRational {
        BigRational::from_integer(BigInt::from(self.to_biguint()))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    /// Makes the target `difficulty` times harder, truncating the quotient
    /// to an integer. A zero difficulty leaves nothing to divide by and
    /// yields [`ROOT_DEPTH`].
    pub fn mul_difficulty(&self, difficulty: &BigRational) -> Target {
        if difficulty.is_zero() {
            return ROOT_DEPTH;
        }
        let quotient = self.to_rational() / difficulty;
        let (_, magnitude) = quotient.to_integer().into_parts();
        Target::from_biguint(&magnitude)
    }

    pub fn difficulty(&self) -> f64 {
        target_to_difficulty(self)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Converts a target into a difficulty relative to [`DIFFICULTY_ONE_TARGET`].
///
/// The ratio `difficulty_one / target` is evaluated as an exact rational and
/// only rounded to the nearest `f64` at the very end, so targets far from
/// difficulty 1 keep full precision. A zero target has no finite difficulty
/// and maps to `f64::INFINITY`.
pub fn target_to_difficulty(target: &Target) -> f64 {
    if target.is_zero() {
        return f64::INFINITY;
    }
    let ratio = DIFFICULTY_ONE_TARGET.to_rational() / target.to_rational();
    ratio.to_f64().unwrap_or(f64::INFINITY)
}
