use crate::jvm::Error;
use log::trace;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Place to look for the bytes of classes
///
/// Sources are consulted in priority order when a registry resolves a name it has not seen yet.
/// Answering `Ok(None)` moves on to the next source, while an error ends the search.
pub trait ByteSource: Debug + Send + Sync {
    /// Bytes of the class with this internal name (eg. `java/lang/Object`)
    fn open(&self, name: &str) -> Result<Option<Vec<u8>>, Error>;
}

/// Destination for finished class files, typically a class loader in a running JVM
pub trait ClassDefiner {
    fn define(&self, name: &str, bytes: &[u8]) -> Result<(), Error>;
}

/// Classes held in memory, keyed by internal name
#[derive(Debug, Default)]
pub struct MemorySource {
    classes: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource::default()
    }

    /// Add (or replace) the bytes of a class
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.classes.write().insert(name.replace('.', "/"), bytes);
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.classes.write().remove(&name.replace('.', "/"))
    }
}

impl ByteSource for MemorySource {
    fn open(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.classes.read().get(name).cloned())
    }
}

/// Classes laid out in a directory tree, `a/b/C` being read from `<root>/a/b/C.class`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> DirectorySource {
        DirectorySource { root: root.into() }
    }
}

impl ByteSource for DirectorySource {
    fn open(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut path = self.root.clone();
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Ok(None);
            }
            path.push(segment);
        }
        path.set_extension("class");
        match std::fs::read(&path) {
            Ok(bytes) => {
                trace!("read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::IoError(err)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_source() {
        let source = MemorySource::new();
        source.insert("a.b.C", vec![1, 2, 3]);
        assert_eq!(source.open("a/b/C").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(source.open("a/b/D").unwrap(), None);
        assert_eq!(source.remove("a/b/C"), Some(vec![1, 2, 3]));
        assert_eq!(source.open("a/b/C").unwrap(), None);
    }

    #[test]
    fn directory_source() {
        let root = std::env::temp_dir().join(format!("classweave-source-{}", std::process::id()));
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/C.class"), [0xCA, 0xFE]).unwrap();

        let source = DirectorySource::new(root.clone());
        assert_eq!(source.open("a/b/C").unwrap(), Some(vec![0xCA, 0xFE]));
        assert_eq!(source.open("a/b/Missing").unwrap(), None);
        assert_eq!(source.open("../b/C").unwrap(), None);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
