use alloy_primitives::{Address, B256};
use std::fmt;

/// A non-negative, 64-bit block/blueprint counter.
///
/// A rollup never produces more than 2^64 blocks, so this follows reth's
/// own `BlockNumber = u64` convention rather than pulling in a bignum type
/// that nothing else in the stack needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Quantity(pub u64);

impl Quantity {
    /// The genesis blueprint number.
    pub const ZERO: Self = Self(0);

    /// Returns `self + 1`, saturating instead of overflowing.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns `self - 1` if `self` is not already zero.
    #[must_use]
    pub const fn checked_prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// The raw integer value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

macro_rules! fixed_hash_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[derive(serde::Serialize, serde::Deserialize)]
        pub struct $name(pub B256);

        impl $name {
            /// The all-zero hash.
            pub const ZERO: Self = Self(B256::ZERO);

            /// Returns the underlying bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                self.0.as_ref()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.0, f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<B256> for $name {
            fn from(value: B256) -> Self {
                Self(value)
            }
        }

        impl From<$name> for B256 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

fixed_hash_newtype!(BlockHash, "A 32-byte committed-block identifier.");
fixed_hash_newtype!(TxHash, "A 32-byte transaction identifier.");

/// The parent hash recorded by blueprint number zero.
///
/// Committing the genesis blueprint advances `next_blueprint_number` from
/// `0` to `1` and replaces this placeholder with the genesis block's real
/// hash.
pub const GENESIS_PARENT_HASH: BlockHash = BlockHash(B256::ZERO);

/// A 20-byte L1 rollup address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RollupAddress(pub Address);

impl fmt::Debug for RollupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for RollupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Address> for RollupAddress {
    fn from(value: Address) -> Self {
        Self(value)
    }
}
