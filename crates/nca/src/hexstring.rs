use binrw::{BinRead, BinWrite};
use hex::FromHexError;
use snafu::Snafu;
use std::str::FromStr;

#[derive(Snafu, Debug)]
pub enum HexParseError {
    #[snafu(display("Expected {} hex characters, got {}", expected, actual))]
    InvalidLength { expected: usize, actual: usize },
    #[snafu(display("Invalid hex character {:?} at index {}", char, index))]
    InvalidChar { char: char, index: usize },
}

/// A fixed-size byte array that parses from and formats as a hex string.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, BinRead, BinWrite)]
pub struct HexData<const N: usize>(pub [u8; N]);

impl<const N: usize> HexData<N> {
    pub const ZERO: Self = Self([0; N]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl<const N: usize> core::fmt::Debug for HexData<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl<const N: usize> core::fmt::Display for HexData<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl<const N: usize> FromStr for HexData<N> {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; N];
        hex::decode_to_slice(s, &mut result).map_err(|e| match e {
            FromHexError::InvalidHexCharacter { c, index } => {
                HexParseError::InvalidChar { char: c, index }
            }
            FromHexError::OddLength | FromHexError::InvalidStringLength => {
                HexParseError::InvalidLength {
                    expected: N * 2,
                    actual: s.len(),
                }
            }
        })?;
        Ok(HexData(result))
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for HexData<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StrVisitor<const N: usize>;
        impl<'de, const N: usize> serde::de::Visitor<'de> for StrVisitor<N> {
            type Value = HexData<N>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a hex string")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                s.parse()
                    .map_err(|_| E::invalid_value(serde::de::Unexpected::Str(s), &self))
            }
        }

        deserializer.deserialize_str(StrVisitor)
    }
}

impl<const N: usize> serde::Serialize for HexData<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<const N: usize> AsRef<[u8]> for HexData<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> AsMut<[u8]> for HexData<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl<const N: usize> From<[u8; N]> for HexData<N> {
    fn from(value: [u8; N]) -> Self {
        Self(value)
    }
}

impl<const N: usize> From<HexData<N>> for [u8; N] {
    fn from(value: HexData<N>) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::HexData;

    #[test]
    fn parse_and_format() {
        let data: HexData<4> = "DeadBeef".parse().unwrap();
        assert_eq!(data.0, [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(data.to_string(), "DEADBEEF");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("deadbee".parse::<HexData<4>>().is_err());
        assert!("deadbeefff".parse::<HexData<4>>().is_err());
        assert!("deadbeeg".parse::<HexData<4>>().is_err());
    }

    #[test]
    fn zero_check() {
        assert!(HexData::<4>::ZERO.is_zero());
        assert!(!"01000000".parse::<HexData<4>>().unwrap().is_zero());
    }
}
