use crate::jvm::{Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Class file format version
///
/// Versions are ordered by major then minor version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const JAVA5: Version = Version::new(49, 0);
    pub const JAVA6: Version = Version::new(50, 0);
    pub const JAVA7: Version = Version::new(51, 0);
    pub const JAVA8: Version = Version::new(52, 0);
    pub const JAVA11: Version = Version::new(55, 0);
    pub const JAVA17: Version = Version::new(61, 0);

    pub const fn new(major: u16, minor: u16) -> Version {
        Version { major, minor }
    }

    /// `jsr` and `ret` are rejected by the verifier from version 51 onwards
    pub fn allows_subroutines(&self) -> bool {
        self.major < 51
    }

    /// Whether code needs a `StackMapTable` to pass verification (51 onwards, or a type-checking
    /// failover for 50)
    pub fn requires_stack_maps(&self) -> bool {
        self.major >= 51
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor.serialize(writer)?;
        self.major.serialize(writer)
    }
}

impl Deserialize for Version {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let minor = u16::deserialize(reader)?;
        let major = u16::deserialize(reader)?;
        Ok(Version { major, minor })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verification_by_version() {
        assert!(Version::JAVA6.allows_subroutines());
        assert!(!Version::JAVA6.requires_stack_maps());
        assert!(!Version::JAVA7.allows_subroutines());
        assert!(Version::JAVA7.requires_stack_maps());
        assert!(Version::JAVA5 < Version::new(49, 3));
    }
}
