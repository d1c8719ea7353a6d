//! Kademlia node Id or a record key
use rand::Rng;
use sha1_smol::Sha1;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Kademlia node Id or a record key.
///
/// Ids of nodes and records live in the same 160 bit space, so both are
/// derived the same way, see [Id::derive].
pub struct Id([u8; ID_SIZE]);

impl Id {
    /// Derive an Id from a human readable name, a node alias or a record name.
    ///
    /// The Id is the SHA-1 digest of the UTF-8 bytes of `name`.
    pub fn derive(name: &str) -> Id {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());

        Id(hasher.digest().bytes())
    }

    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE](crate::common::ID_SIZE).
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// XOR distance between this Id and a target Id.
    ///
    /// Compared as an unsigned big endian integer, see [Distance].
    pub fn distance(&self, other: &Id) -> Distance {
        let mut xor = [0_u8; ID_SIZE];

        for (i, byte) in xor.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Distance(xor)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Id(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        if s.len() != ID_SIZE * 2 || !s.is_ascii() {
            return Err(Error::InvalidIdEncoding(s.to_string()));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidIdEncoding(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}

/// XOR of two [Id]s, ordered as a big endian unsigned integer.
///
/// Lexicographic byte order of a fixed length array is exactly the
/// magnitude order, so the derived [Ord] is the metric's order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance([u8; ID_SIZE]);

impl Distance {
    pub const ZERO: Distance = Distance([0; ID_SIZE]);

    pub fn is_zero(&self) -> bool {
        self == &Distance::ZERO
    }
}

impl Debug for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Distance(")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();
        let distance = id.distance(&id);
        assert!(distance.is_zero());
    }

    #[test]
    fn distance_is_symmetric() {
        for _ in 0..50 {
            let a = Id::random();
            let b = Id::random();

            assert_eq!(a.distance(&b), b.distance(&a));
        }
    }

    #[test]
    fn distance_zero_iff_equal() {
        let a = Id::derive("node1");
        let b = Id::derive("node2");

        assert!(!a.distance(&b).is_zero());
        assert!(a.distance(&Id::derive("node1")).is_zero());
    }

    #[test]
    fn distance_is_big_endian() {
        let zero = Id::from([0; ID_SIZE]);

        let mut high = [0; ID_SIZE];
        high[0] = 1;
        let mut low = [0; ID_SIZE];
        low[ID_SIZE - 1] = 0xff;

        assert!(zero.distance(&Id::from(low)) < zero.distance(&Id::from(high)));
    }

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(Id::derive("Lift-off Pass"), Id::derive("Lift-off Pass"));
        assert_ne!(Id::derive("node1"), Id::derive("node10"));
    }

    #[test]
    fn derive_does_not_collide_on_shared_prefix() {
        let a = Id::derive("a very long name that goes past twenty bytes 1");
        let b = Id::derive("a very long name that goes past twenty bytes 2");

        assert_ne!(a, b);
    }

    #[test]
    fn derive_is_sha1() {
        assert_eq!(
            Id::derive("abc").to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn hex_round_trip() {
        let id = Id::random();
        let parsed: Id = id.to_string().parse().unwrap();

        assert_eq!(parsed, id);
        assert!("zz".parse::<Id>().is_err());
        assert!("zz993e364706816aba3e25717850c26c9cd0d89d".parse::<Id>().is_err());
    }

    #[test]
    fn from_bytes_checks_size() {
        assert!(Id::from_bytes([0_u8; 19]).is_err());
        assert!(Id::from_bytes([0_u8; 20]).is_ok());
    }
}
