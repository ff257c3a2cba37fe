use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Class or interface name in internal form (`java/lang/Object`)
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

impl BinaryName {
    pub const OBJECT: BinaryName = BinaryName(Cow::Borrowed("java/lang/Object"));
    pub const CLONEABLE: BinaryName = BinaryName(Cow::Borrowed("java/lang/Cloneable"));
    pub const SERIALIZABLE: BinaryName = BinaryName(Cow::Borrowed("java/io/Serializable"));

    /// Check that every `/`-separated segment is a non-empty unqualified name
    pub fn from_string(name: String) -> Result<BinaryName, String> {
        if name.is_empty() {
            return Err(String::from("class name is empty"));
        }
        for segment in name.split('/') {
            if segment.is_empty() {
                return Err(format!("class name '{}' has an empty segment", name));
            }
            if let Some(c) = segment.chars().find(|c| matches!(c, '.' | ';' | '[')) {
                return Err(format!("class name '{}' contains '{}'", name, c));
            }
        }
        Ok(BinaryName(Cow::Owned(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_names() {
        assert_eq!(
            BinaryName::from_string(String::from("java/util/Map$Entry"))
                .unwrap()
                .as_str(),
            "java/util/Map$Entry"
        );
        assert!(BinaryName::from_string(String::new()).is_err());
        assert!(BinaryName::from_string(String::from("a//b")).is_err());
        assert!(BinaryName::from_string(String::from("a/[b")).is_err());
        assert!(BinaryName::from_string(String::from("a.b")).is_err());
    }
}
