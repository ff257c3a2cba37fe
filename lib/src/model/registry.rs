use super::{ByteSource, ClassEntity};
use crate::compile::FragmentCompiler;
use crate::jvm::class_file::ClassFile;
use crate::jvm::{ClassAccessFlags, Error, Version};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Number of lookups between automatic compactions
pub const DEFAULT_COMPACT_THRESHOLD: usize = 100;

const PRIMITIVES: [(&str, char); 9] = [
    ("boolean", 'Z'),
    ("char", 'C'),
    ("byte", 'B'),
    ("short", 'S'),
    ("int", 'I'),
    ("long", 'J'),
    ("float", 'F'),
    ("double", 'D'),
    ("void", 'V'),
];

/// Cache of class entities, keyed by internal name
///
/// Resolving the same name twice through one registry gives back the same entity, so that every
/// class has a single editable representation. Names the registry has not seen yet are looked up
/// in its byte sources (and, depending on the lookup order, in the parent registry).
///
/// ### Locking
///
/// The registry state sits behind one mutex and every entity behind its own lock. When both are
/// needed, the registry lock is taken first, and a child registry is locked before its parent.
pub struct ClassRegistry {
    parent: Option<Arc<ClassRegistry>>,

    /// Look in this registry before asking the parent
    child_first: bool,

    this: Weak<ClassRegistry>,
    state: Mutex<RegistryState>,
    compiler: RwLock<Option<Arc<dyn FragmentCompiler>>>,
    auto_prune: AtomicBool,
}

struct RegistryState {
    classes: HashMap<String, Arc<ClassEntity>>,

    /// Names no source could supply
    missing: HashSet<String>,

    /// Sources, highest priority first
    sources: Vec<Arc<dyn ByteSource>>,

    /// Lookups since the last compaction
    lookups: usize,
    compact_threshold: usize,
}

impl ClassRegistry {
    /// Root registry, knowing only the primitive types
    pub fn new() -> Arc<ClassRegistry> {
        ClassRegistry::build(None, false)
    }

    /// Registry delegating to `parent` for names it cannot resolve itself (or, unless
    /// `child_first` is set, before even trying to)
    pub fn with_parent(parent: &Arc<ClassRegistry>, child_first: bool) -> Arc<ClassRegistry> {
        ClassRegistry::build(Some(parent.clone()), child_first)
    }

    /// Process-wide registry, created on first use
    pub fn global() -> Arc<ClassRegistry> {
        static GLOBAL: OnceLock<Arc<ClassRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(ClassRegistry::new).clone()
    }

    fn build(parent: Option<Arc<ClassRegistry>>, child_first: bool) -> Arc<ClassRegistry> {
        let mut classes = HashMap::new();
        if parent.is_none() {
            for (name, descriptor) in PRIMITIVES {
                classes.insert(name.to_owned(), ClassEntity::primitive(name, descriptor));
            }
        }
        Arc::new_cyclic(|this| ClassRegistry {
            parent,
            child_first,
            this: this.clone(),
            state: Mutex::new(RegistryState {
                classes,
                missing: HashSet::new(),
                sources: vec![],
                lookups: 0,
                compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            }),
            compiler: RwLock::new(None),
            auto_prune: AtomicBool::new(false),
        })
    }

    pub fn parent(&self) -> Option<&Arc<ClassRegistry>> {
        self.parent.as_ref()
    }

    /// Add a source searched before all others
    pub fn insert_source(&self, source: Arc<dyn ByteSource>) {
        let mut state = self.state.lock();
        debug!("inserting source {:?}", source);
        state.sources.insert(0, source);
        state.missing.clear();
    }

    /// Add a source searched after all others
    pub fn append_source(&self, source: Arc<dyn ByteSource>) {
        let mut state = self.state.lock();
        debug!("appending source {:?}", source);
        state.sources.push(source);
        state.missing.clear();
    }

    pub fn set_compiler(&self, compiler: Arc<dyn FragmentCompiler>) {
        *self.compiler.write() = Some(compiler);
    }

    /// Fragment compiler of this registry, or else of the closest ancestor that has one
    pub fn compiler(&self) -> Option<Arc<dyn FragmentCompiler>> {
        if let Some(compiler) = self.compiler.read().as_ref() {
            return Some(compiler.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.compiler())
    }

    pub fn set_auto_prune(&self, auto_prune: bool) {
        self.auto_prune.store(auto_prune, Ordering::Relaxed);
    }

    pub fn auto_prune(&self) -> bool {
        self.auto_prune.load(Ordering::Relaxed)
    }

    /// Compact automatically every `threshold` lookups (`0` turns this off)
    pub fn set_compact_threshold(&self, threshold: usize) {
        let mut state = self.state.lock();
        state.compact_threshold = threshold;
        state.lookups = 0;
    }

    /// Entity for a name, failing with [`Error::NotFound`] if there is none
    pub fn resolve(&self, name: &str) -> Result<Arc<ClassEntity>, Error> {
        self.find(name)?
            .ok_or_else(|| Error::NotFound(name.replace('.', "/")))
    }

    /// Entity for a name, if any registry in the chain or any of their sources knows it
    ///
    /// Both `a.b.C` and `a/b/C` are accepted. Names ending in `[]` denote arrays.
    pub fn find(&self, name: &str) -> Result<Option<Arc<ClassEntity>>, Error> {
        let name = name.replace('.', "/");
        if let Some(component) = name.strip_suffix("[]") {
            return self.find_array(&name, component);
        }

        if !self.child_first {
            if let Some(parent) = &self.parent {
                if let Some(found) = parent.find(&name)? {
                    return Ok(Some(found));
                }
            }
        }
        if let Some(found) = self.find_local(&name)? {
            return Ok(Some(found));
        }
        match (&self.parent, self.child_first) {
            (Some(parent), true) => parent.find(&name),
            _ => Ok(None),
        }
    }

    /// Arrays live next to their component type
    fn find_array(&self, name: &str, component: &str) -> Result<Option<Arc<ClassEntity>>, Error> {
        let component = match self.find(component)? {
            Some(component) => component,
            None => return Ok(None),
        };
        let owner = component
            .registry()
            .or_else(|| self.root())
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        let mut state = owner.state.lock();
        let entity = state
            .classes
            .entry(name.to_owned())
            .or_insert_with(|| ClassEntity::array(owner.this.clone(), component))
            .clone();
        Ok(Some(entity))
    }

    fn root(&self) -> Option<Arc<ClassRegistry>> {
        match &self.parent {
            Some(parent) => parent.root(),
            None => self.this.upgrade(),
        }
    }

    /// Look in this registry's cache and sources only
    fn find_local(&self, name: &str) -> Result<Option<Arc<ClassEntity>>, Error> {
        let (cached, sources, compact) = {
            let mut state = self.state.lock();
            state.lookups += 1;
            let compact = state.compact_threshold != 0 && state.lookups >= state.compact_threshold;
            let cached = state.classes.get(name).cloned();
            let sources = if cached.is_none() && !state.missing.contains(name) {
                state.sources.clone()
            } else {
                vec![]
            };
            (cached, sources, compact)
        };
        if compact {
            self.compact();
        }
        if cached.is_some() {
            return Ok(cached);
        }

        for source in sources {
            if let Some(bytes) = source.open(name)? {
                debug!("loaded {} from {:?}", name, source);
                let entity = ClassEntity::from_bytes(self.this.clone(), name, bytes);
                let mut state = self.state.lock();
                let entity = state.classes.entry(name.to_owned()).or_insert(entity);
                return Ok(Some(entity.clone()));
            }
        }
        self.state.lock().missing.insert(name.to_owned());
        Ok(None)
    }

    /// Make an entity out of class file bytes, replacing whatever entity had the name before
    ///
    /// With `if_not_frozen` set, an existing frozen entity is an error instead.
    pub fn register_bytes(
        &self,
        name: &str,
        bytes: Vec<u8>,
        if_not_frozen: bool,
    ) -> Result<Arc<ClassEntity>, Error> {
        let name = name.replace('.', "/");
        let class = ClassFile::parse(&bytes)?;
        let declared = class.name()?;
        if declared != name {
            return Err(Error::malformed(format!(
                "bytes registered as {} declare class {}",
                name, declared
            )));
        }

        let mut state = self.state.lock();
        if let Some(existing) = state.classes.get(&name) {
            if if_not_frozen && existing.is_frozen() {
                return Err(Error::Frozen(name));
            }
        }
        let entity = ClassEntity::from_class_file(self.this.clone(), class, Some(bytes))?;
        state.classes.insert(name.clone(), entity.clone());
        state.missing.remove(&name);
        debug!("registered {}", name);
        Ok(entity)
    }

    /// Create a new, empty public class (extending `java/lang/Object` by default)
    pub fn make_class(
        &self,
        name: &str,
        superclass: Option<&str>,
    ) -> Result<Arc<ClassEntity>, Error> {
        let superclass = superclass.unwrap_or("java/lang/Object").replace('.', "/");
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        self.make(name, Some(&superclass), flags)
    }

    /// Create a new, empty public interface
    pub fn make_interface(&self, name: &str) -> Result<Arc<ClassEntity>, Error> {
        let flags =
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        self.make(name, Some("java/lang/Object"), flags)
    }

    fn make(
        &self,
        name: &str,
        superclass: Option<&str>,
        flags: ClassAccessFlags,
    ) -> Result<Arc<ClassEntity>, Error> {
        let name = name.replace('.', "/");
        let class = ClassFile::new(&name, superclass, flags, Version::JAVA8)?;
        let entity = ClassEntity::from_class_file(self.this.clone(), class, None)?;
        let mut state = self.state.lock();
        if let Some(existing) = state.classes.get(&name) {
            if existing.is_frozen() {
                return Err(Error::Frozen(name));
            }
        }
        state.classes.insert(name.clone(), entity.clone());
        state.missing.remove(&name);
        debug!("created {}", name);
        Ok(entity)
    }

    /// Rename a class, moving its entry in the registry that holds it
    pub fn rename(&self, old: &str, new: &str) -> Result<(), Error> {
        let (old, new) = (old.replace('.', "/"), new.replace('.', "/"));
        let entity = self.resolve(&old)?;
        let mut registry = Some(self);
        while let Some(current) = registry {
            let taken = current.state.lock().classes.get(&new).cloned();
            if let Some(taken) = taken {
                if taken.is_frozen() {
                    return Err(Error::Frozen(new));
                }
            }
            registry = current.parent.as_deref();
        }

        let owner = match entity.registry() {
            Some(owner) => owner,
            None => return entity.rename_to(&new),
        };
        let mut state = owner.state.lock();
        entity.rename_to(&new)?;
        state.classes.remove(&old);
        state.classes.insert(new.clone(), entity);
        state.missing.remove(&new);
        Ok(())
    }

    /// Forget an entity, so that the next lookup creates a fresh one
    pub fn detach(&self, name: &str) -> Option<Arc<ClassEntity>> {
        let name = name.replace('.', "/");
        let detached = self.state.lock().classes.remove(&name);
        if detached.is_some() {
            debug!("detached {}", name);
        }
        detached
    }

    /// Release the decoded form of every entity not accessed since the previous compaction
    ///
    /// Returns the number of entities released. Entities with unsaved edits are never released.
    pub fn compact(&self) -> usize {
        let mut state = self.state.lock();
        state.lookups = 0;
        let released = state
            .classes
            .values()
            .filter(|entity| entity.release_if_idle())
            .count();
        if released > 0 {
            debug!("compaction released {} classes", released);
        }
        released
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("parent", &self.parent)
            .field("child_first", &self.child_first)
            .finish()
    }
}
