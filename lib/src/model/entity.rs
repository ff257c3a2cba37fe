use super::{ClassDefiner, ClassRegistry, Member, MemberKind};
use crate::compile::FragmentCompiler;
use crate::jvm::class_file::{ClassFile, Field, Method};
use crate::jvm::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, ParseDescriptor, Version,
};
use crate::splice::{self, PendingInitializer};
use log::{debug, trace};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// What sort of type an entity stands for
#[derive(Clone, Debug)]
pub enum EntityKind {
    /// Class or interface backed by a class file
    Ordinary,

    /// One of the primitive types, or `void`
    Primitive { descriptor: char },

    /// Array type (the component is resolved before the array)
    Array { component: Arc<ClassEntity> },
}

/// Value assigned to a new field when the class is frozen
#[derive(Clone, Debug, PartialEq)]
pub enum FieldInitializer {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),

    /// Source for the fragment compiler leaving the value on the stack
    Code(String),
}

impl FieldInitializer {
    /// Whether the initializer can become a `ConstantValue` attribute
    pub fn is_constant(&self) -> bool {
        !matches!(self, FieldInitializer::Code(_))
    }

    /// Check that a constant fits a field descriptor
    fn check_fits(&self, descriptor: &str) -> Result<(), Error> {
        let fits = match self {
            FieldInitializer::Int(_) => matches!(descriptor, "I" | "Z" | "B" | "C" | "S"),
            FieldInitializer::Long(_) => descriptor == "J",
            FieldInitializer::Float(_) => descriptor == "F",
            FieldInitializer::Double(_) => descriptor == "D",
            FieldInitializer::String(_) => descriptor == "Ljava/lang/String;",
            FieldInitializer::Code(_) => true,
        };
        if fits {
            Ok(())
        } else {
            Err(Error::cannot_compile(format!(
                "initializer {:?} does not fit a field of type {}",
                self, descriptor
            )))
        }
    }
}

/// One class, array, or primitive type, as known to a registry
///
/// Ordinary entities start out holding only bytes; the class file is decoded the first time
/// anything asks for its structure. Edits go through the entity (or through its [`Member`]s), and
/// [`ClassEntity::freeze`] turns the result back into bytes.
///
/// ### Lifecycle
///
///   - a _modified_ entity has been edited since it was loaded
///   - a _frozen_ entity has been serialized, and refuses edits until [`ClassEntity::defrost`]
///   - a _pruned_ entity has thrown its structure away after freezing, for good
pub struct ClassEntity {
    kind: EntityKind,
    registry: Weak<ClassRegistry>,

    /// Set on every structural access, cleared by registry compaction
    accessed: AtomicBool,
    state: RwLock<EntityState>,
}

struct EntityState {
    name: String,

    /// Decoded class, absent until first needed or after compaction
    class_file: Option<ClassFile>,

    /// Bytes `class_file` is decoded from: the raw bytes from a source, or the frozen output
    /// once compaction has dropped the decoded form
    bytes: Option<Vec<u8>>,

    /// Bytes produced by the last freeze
    output: Option<Vec<u8>>,

    modified: bool,
    frozen: bool,
    pruned: bool,
    stop_pruning: bool,

    /// Bumped whenever members are added or removed
    generation: u64,
    members: Option<MemberCache>,
    initializers: Vec<PendingInitializer>,
}

/// Position of every member in the decoded field and method tables, valid for one generation
struct MemberCache {
    generation: u64,
    slots: HashMap<(String, String), MemberSlot>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MemberSlot {
    Field(usize),
    Method(usize),
}

impl EntityState {
    fn new(name: String) -> EntityState {
        EntityState {
            name,
            class_file: None,
            bytes: None,
            output: None,
            modified: false,
            frozen: false,
            pruned: false,
            stop_pruning: false,
            generation: 0,
            members: None,
            initializers: vec![],
        }
    }

    fn check_readable(&self) -> Result<(), Error> {
        if self.pruned {
            return Err(Error::Pruned(self.name.clone()));
        }
        Ok(())
    }

    fn check_modify(&self) -> Result<(), Error> {
        self.check_readable()?;
        if self.frozen {
            return Err(Error::Frozen(self.name.clone()));
        }
        Ok(())
    }

    /// Decode the class file if that hasn't happened yet
    fn decode(&mut self) -> Result<(), Error> {
        self.check_readable()?;
        if self.class_file.is_some() {
            return Ok(());
        }
        let bytes = self
            .bytes
            .as_ref()
            .ok_or_else(|| Error::malformed(format!("{} has no class file", self.name)))?;
        let class = ClassFile::parse(bytes)?;
        let declared = class.name()?;
        if declared != self.name {
            return Err(Error::malformed(format!(
                "bytes for {} declare class {}",
                self.name, declared
            )));
        }
        trace!("decoded {} ({} bytes)", self.name, bytes.len());
        self.class_file = Some(class);
        Ok(())
    }

    fn class(&self) -> Result<&ClassFile, Error> {
        self.check_readable()?;
        self.class_file
            .as_ref()
            .ok_or_else(|| Error::malformed(format!("{} is not decoded", self.name)))
    }

    fn members_current(&self) -> bool {
        !self.pruned
            && self.class_file.is_some()
            && self
                .members
                .as_ref()
                .map_or(false, |cache| cache.generation == self.generation)
    }

    fn refresh_members(&mut self) -> Result<(), Error> {
        self.decode()?;
        if self.members_current() {
            return Ok(());
        }
        let class = self.class()?;
        let mut slots = HashMap::new();
        for (idx, field) in class.fields.iter().enumerate() {
            let key = (
                field.name(&class.constants)?.to_owned(),
                field.descriptor(&class.constants)?.to_owned(),
            );
            slots.insert(key, MemberSlot::Field(idx));
        }
        for (idx, method) in class.methods.iter().enumerate() {
            let key = (
                method.name(&class.constants)?.to_owned(),
                method.descriptor(&class.constants)?.to_owned(),
            );
            slots.insert(key, MemberSlot::Method(idx));
        }
        trace!(
            "rebuilt member cache of {} ({} members, generation {})",
            self.name,
            slots.len(),
            self.generation
        );
        self.members = Some(MemberCache {
            generation: self.generation,
            slots,
        });
        Ok(())
    }

    fn lookup(&self, name: &str, descriptor: &str) -> Result<MemberSlot, Error> {
        self.members
            .as_ref()
            .and_then(|cache| cache.slots.get(&(name.to_owned(), descriptor.to_owned())))
            .copied()
            .ok_or_else(|| Error::NotFound(format!("{}.{}:{}", self.name, name, descriptor)))
    }
}

impl ClassEntity {
    /// Entity whose class file will be decoded from `bytes` on first use
    pub(crate) fn from_bytes(
        registry: Weak<ClassRegistry>,
        name: &str,
        bytes: Vec<u8>,
    ) -> Arc<ClassEntity> {
        let mut state = EntityState::new(name.to_owned());
        state.bytes = Some(bytes);
        ClassEntity::ordinary(registry, state)
    }

    /// Entity for an already decoded class file
    pub(crate) fn from_class_file(
        registry: Weak<ClassRegistry>,
        class_file: ClassFile,
        bytes: Option<Vec<u8>>,
    ) -> Result<Arc<ClassEntity>, Error> {
        let mut state = EntityState::new(class_file.name()?.to_owned());
        state.modified = bytes.is_none();
        state.bytes = bytes;
        state.class_file = Some(class_file);
        Ok(ClassEntity::ordinary(registry, state))
    }

    fn ordinary(registry: Weak<ClassRegistry>, state: EntityState) -> Arc<ClassEntity> {
        Arc::new(ClassEntity {
            kind: EntityKind::Ordinary,
            registry,
            accessed: AtomicBool::new(true),
            state: RwLock::new(state),
        })
    }

    pub(crate) fn primitive(name: &str, descriptor: char) -> Arc<ClassEntity> {
        Arc::new(ClassEntity {
            kind: EntityKind::Primitive { descriptor },
            registry: Weak::new(),
            accessed: AtomicBool::new(false),
            state: RwLock::new(EntityState::new(name.to_owned())),
        })
    }

    pub(crate) fn array(registry: Weak<ClassRegistry>, component: Arc<ClassEntity>) -> Arc<ClassEntity> {
        let name = format!("{}[]", component.name());
        Arc::new(ClassEntity {
            kind: EntityKind::Array { component },
            registry,
            accessed: AtomicBool::new(false),
            state: RwLock::new(EntityState::new(name)),
        })
    }

    /// Internal name (`a/b/C`, `int`, or `a/b/C[]`)
    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, EntityKind::Primitive { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, EntityKind::Array { .. })
    }

    /// Element type of an array
    pub fn component_type(&self) -> Option<Arc<ClassEntity>> {
        match &self.kind {
            EntityKind::Array { component } => Some(component.clone()),
            _ => None,
        }
    }

    /// Type descriptor, eg. `Ljava/lang/String;`, `I`, or `[I`
    pub fn descriptor(&self) -> String {
        match &self.kind {
            EntityKind::Ordinary => format!("L{};", self.name()),
            EntityKind::Primitive { descriptor } => descriptor.to_string(),
            EntityKind::Array { component } => format!("[{}", component.descriptor()),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.state.read().modified
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().frozen
    }

    pub fn is_pruned(&self) -> bool {
        self.state.read().pruned
    }

    /// Registry the entity belongs to (gone once the registry is dropped)
    pub fn registry(&self) -> Option<Arc<ClassRegistry>> {
        self.registry.upgrade()
    }

    fn not_ordinary(&self) -> Error {
        Error::cannot_compile(format!("{} is not backed by a class file", self.name()))
    }

    fn ensure_ordinary(&self) -> Result<(), Error> {
        match self.kind {
            EntityKind::Ordinary => Ok(()),
            _ => Err(self.not_ordinary()),
        }
    }

    /// Run a read-only query against the decoded class, decoding it first if needed
    fn read<R>(&self, query: impl FnOnce(&ClassFile) -> Result<R, Error>) -> Result<R, Error> {
        self.ensure_ordinary()?;
        self.accessed.store(true, Ordering::Relaxed);
        {
            let state = self.state.read();
            if state.class_file.is_some() || state.pruned {
                return query(state.class()?);
            }
        }
        let mut state = self.state.write();
        state.decode()?;
        let state = RwLockWriteGuard::downgrade(state);
        query(state.class()?)
    }

    /// Run an edit against a copy of the class, keeping the copy only if the edit succeeds
    ///
    /// Structural edits (adding or removing members) invalidate the member cache.
    fn edit<R>(
        &self,
        structural: bool,
        edit: impl FnOnce(&mut ClassFile, &mut Vec<PendingInitializer>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.ensure_ordinary()?;
        self.accessed.store(true, Ordering::Relaxed);
        let mut state = self.state.write();
        state.check_modify()?;
        state.decode()?;

        let mut class = state.class()?.clone();
        let mut initializers = state.initializers.clone();
        let result = edit(&mut class, &mut initializers)?;

        state.class_file = Some(class);
        state.initializers = initializers;
        state.modified = true;
        if structural {
            state.generation += 1;
        }
        Ok(result)
    }

    /// Run a query on one member, resolved through the member cache
    pub(crate) fn read_member<R>(
        &self,
        name: &str,
        descriptor: &str,
        query: impl FnOnce(&ClassFile, MemberSlot) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.ensure_ordinary()?;
        self.accessed.store(true, Ordering::Relaxed);
        {
            let state = self.state.read();
            if state.members_current() {
                let slot = state.lookup(name, descriptor)?;
                return query(state.class()?, slot);
            }
        }
        let mut state = self.state.write();
        state.refresh_members()?;
        let state = RwLockWriteGuard::downgrade(state);
        let slot = state.lookup(name, descriptor)?;
        query(state.class()?, slot)
    }

    /// Edit one member in place (which does not change the member set)
    pub(crate) fn edit_member<R>(
        &self,
        name: &str,
        descriptor: &str,
        edit: impl FnOnce(&mut ClassFile, MemberSlot) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.ensure_ordinary()?;
        self.accessed.store(true, Ordering::Relaxed);
        let mut state = self.state.write();
        state.check_modify()?;
        state.refresh_members()?;
        let slot = state.lookup(name, descriptor)?;

        let mut class = state.class()?.clone();
        let result = edit(&mut class, slot)?;
        state.class_file = Some(class);
        state.modified = true;
        Ok(result)
    }

    /// Apply an edit to the whole class at once: either every change is kept, or none is
    pub(crate) fn edit_class<R>(
        &self,
        edit: impl FnOnce(&mut ClassFile) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.edit(false, |class, _| edit(class))
    }

    /// Compiler of the registry this entity belongs to
    pub(crate) fn compiler(&self) -> Result<Arc<dyn FragmentCompiler>, Error> {
        self.registry
            .upgrade()
            .and_then(|registry| registry.compiler())
            .ok_or_else(|| {
                Error::cannot_compile(format!(
                    "no fragment compiler is configured for {}",
                    self.name()
                ))
            })
    }

    // Structure

    pub fn access_flags(&self) -> Result<ClassAccessFlags, Error> {
        match self.kind {
            EntityKind::Ordinary => self.read(|class| Ok(class.access_flags)),
            _ => Ok(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT),
        }
    }

    pub fn is_interface(&self) -> Result<bool, Error> {
        Ok(self.access_flags()?.contains(ClassAccessFlags::INTERFACE) && !self.is_primitive())
    }

    pub fn superclass_name(&self) -> Result<Option<String>, Error> {
        match self.kind {
            EntityKind::Ordinary => self.read(|class| Ok(class.super_name()?.map(str::to_owned))),
            EntityKind::Primitive { .. } => Ok(None),
            EntityKind::Array { .. } => Ok(Some(BinaryName::OBJECT.as_str().to_owned())),
        }
    }

    /// Superclass, resolved through the registry
    pub fn superclass(&self) -> Result<Option<Arc<ClassEntity>>, Error> {
        let name = match self.superclass_name()? {
            Some(name) => name,
            None => return Ok(None),
        };
        match self.registry.upgrade() {
            Some(registry) => registry.resolve(&name).map(Some),
            None => Err(Error::NotFound(name)),
        }
    }

    pub fn interface_names(&self) -> Result<Vec<String>, Error> {
        match self.kind {
            EntityKind::Ordinary => self.read(|class| {
                Ok(class
                    .interface_names()?
                    .into_iter()
                    .map(str::to_owned)
                    .collect())
            }),
            EntityKind::Primitive { .. } => Ok(vec![]),
            EntityKind::Array { .. } => Ok(vec![
                BinaryName::CLONEABLE.as_str().to_owned(),
                BinaryName::SERIALIZABLE.as_str().to_owned(),
            ]),
        }
    }

    pub fn version(&self) -> Result<Version, Error> {
        self.read(|class| Ok(class.version))
    }

    pub fn set_access_flags(&self, access_flags: ClassAccessFlags) -> Result<(), Error> {
        self.edit(false, |class, _| {
            class.access_flags = access_flags;
            Ok(())
        })
    }

    /// Change the superclass, along with the `super(...)` calls of every constructor
    pub fn set_superclass(&self, superclass: &str) -> Result<(), Error> {
        let superclass = superclass.replace('.', "/");
        self.edit(false, |class, _| {
            let old = class.super_name()?.map(str::to_owned);
            class.super_class = class.constants.get_class(&superclass)?;
            if let Some(old) = old {
                splice::retarget_super_calls(class, &old, &superclass)?;
            }
            Ok(())
        })
    }

    pub fn add_interface(&self, interface: &str) -> Result<(), Error> {
        let interface = interface.replace('.', "/");
        self.edit(false, |class, _| {
            if class.interface_names()?.contains(&interface.as_str()) {
                return Ok(());
            }
            let index = class.constants.get_class(&interface)?;
            class.interfaces.push(index);
            Ok(())
        })
    }

    pub fn set_version(&self, version: Version) -> Result<(), Error> {
        self.edit(false, |class, _| {
            class.version = version;
            Ok(())
        })
    }

    /// Rename the class (moving its registry entry along)
    pub fn set_name(&self, name: &str) -> Result<(), Error> {
        match self.registry.upgrade() {
            Some(registry) => registry.rename(&self.name(), name),
            None => self.rename_to(&name.replace('.', "/")),
        }
    }

    /// Rename the class file (the registry entry is the caller's business)
    pub(crate) fn rename_to(&self, new_name: &str) -> Result<(), Error> {
        self.edit(true, |class, _| class.rename(new_name))?;
        let mut state = self.state.write();
        debug!("renamed {} to {}", state.name, new_name);
        state.name = new_name.to_owned();
        Ok(())
    }

    // Members

    fn member(self: &Arc<Self>, slot: MemberSlot, name: &str, descriptor: &str) -> Member {
        let kind = match slot {
            MemberSlot::Field(_) => MemberKind::Field,
            MemberSlot::Method(_) if name == "<init>" => MemberKind::Constructor,
            MemberSlot::Method(_) if name == "<clinit>" => MemberKind::ClassInitializer,
            MemberSlot::Method(_) => MemberKind::Method,
        };
        Member::new(self.clone(), kind, name, descriptor)
    }

    /// Field or method with this name and descriptor
    pub fn get_member(self: &Arc<Self>, name: &str, descriptor: &str) -> Result<Member, Error> {
        let slot = self.read_member(name, descriptor, |_, slot| Ok(slot))?;
        Ok(self.member(slot, name, descriptor))
    }

    /// First field with this name
    pub fn get_field(self: &Arc<Self>, name: &str) -> Result<Member, Error> {
        let descriptor = self.read(|class| match class.find_field(name)? {
            Some(idx) => Ok(class.fields[idx].descriptor(&class.constants)?.to_owned()),
            None => Err(Error::NotFound(format!("{}.{}", class.name()?, name))),
        })?;
        Ok(Member::new(self.clone(), MemberKind::Field, name, &descriptor))
    }

    pub fn get_method(self: &Arc<Self>, name: &str, descriptor: &str) -> Result<Member, Error> {
        let member = self.get_member(name, descriptor)?;
        if member.kind() == MemberKind::Field {
            return Err(Error::NotFound(format!("{}.{}{}", self.name(), name, descriptor)));
        }
        Ok(member)
    }

    pub fn get_constructor(self: &Arc<Self>, descriptor: &str) -> Result<Member, Error> {
        self.get_method("<init>", descriptor)
    }

    /// Static initializer, if the class has one
    pub fn class_initializer(self: &Arc<Self>) -> Result<Option<Member>, Error> {
        match self.get_method("<clinit>", "()V") {
            Ok(member) => Ok(Some(member)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn all_members(self: &Arc<Self>) -> Result<Vec<Member>, Error> {
        if !matches!(self.kind, EntityKind::Ordinary) {
            return Ok(vec![]);
        }
        let keys = self.read(|class| {
            let mut keys = vec![];
            for field in &class.fields {
                keys.push((
                    MemberSlot::Field(0),
                    field.name(&class.constants)?.to_owned(),
                    field.descriptor(&class.constants)?.to_owned(),
                ));
            }
            for method in &class.methods {
                keys.push((
                    MemberSlot::Method(0),
                    method.name(&class.constants)?.to_owned(),
                    method.descriptor(&class.constants)?.to_owned(),
                ));
            }
            Ok(keys)
        })?;
        Ok(keys
            .into_iter()
            .map(|(slot, name, descriptor)| self.member(slot, &name, &descriptor))
            .collect())
    }

    /// Fields, then constructors, then methods, each in table order (the static initializer is
    /// left out)
    pub fn members(self: &Arc<Self>) -> Result<std::vec::IntoIter<Member>, Error> {
        let all = self.all_members()?;
        let mut ordered = Vec::with_capacity(all.len());
        for kind in [MemberKind::Field, MemberKind::Constructor, MemberKind::Method] {
            ordered.extend(all.iter().filter(|member| member.kind() == kind).cloned());
        }
        Ok(ordered.into_iter())
    }

    pub fn declared_fields(self: &Arc<Self>) -> Result<Vec<Member>, Error> {
        self.members_of_kind(MemberKind::Field)
    }

    pub fn declared_methods(self: &Arc<Self>) -> Result<Vec<Member>, Error> {
        self.members_of_kind(MemberKind::Method)
    }

    pub fn constructors(self: &Arc<Self>) -> Result<Vec<Member>, Error> {
        self.members_of_kind(MemberKind::Constructor)
    }

    fn members_of_kind(self: &Arc<Self>, kind: MemberKind) -> Result<Vec<Member>, Error> {
        Ok(self
            .all_members()?
            .into_iter()
            .filter(|member| member.kind() == kind)
            .collect())
    }

    pub fn add_field(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
        access_flags: FieldAccessFlags,
    ) -> Result<Member, Error> {
        self.edit(true, |class, _| {
            push_field(class, name, descriptor, access_flags)
        })?;
        debug!("added field {}.{}:{}", self.name(), name, descriptor);
        Ok(Member::new(self.clone(), MemberKind::Field, name, descriptor))
    }

    /// Add a field whose value is set when the class is frozen
    ///
    /// Constants for `static final` fields become `ConstantValue` attributes. Other static fields
    /// are set at the start of the static initializer, and instance fields right after the
    /// `super(...)` call of every constructor that doesn't delegate to `this(...)`.
    pub fn add_field_with_initializer(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
        access_flags: FieldAccessFlags,
        initializer: FieldInitializer,
    ) -> Result<Member, Error> {
        initializer.check_fits(descriptor)?;
        self.edit(true, |class, initializers| {
            push_field(class, name, descriptor, access_flags)?;
            initializers.push(PendingInitializer {
                field_name: name.to_owned(),
                descriptor: descriptor.to_owned(),
                initializer,
            });
            Ok(())
        })?;
        Ok(Member::new(self.clone(), MemberKind::Field, name, descriptor))
    }

    /// Add a method, optionally with a body compiled from source
    ///
    /// Methods without a body should be `abstract` or `native`.
    pub fn add_method(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
        body: Option<&str>,
    ) -> Result<Member, Error> {
        let compiler = match body {
            Some(_) => Some(self.compiler()?),
            None => None,
        };
        self.edit(true, |class, _| {
            MethodDescriptor::parse(descriptor).map_err(|err| {
                Error::cannot_compile(format!("bad method descriptor {}: {}", descriptor, err))
            })?;
            if class.find_method(name, descriptor)?.is_some() {
                return Err(duplicate(class, name, descriptor));
            }
            let name_index = class.constants.get_utf8(name)?;
            let descriptor_index = class.constants.get_utf8(descriptor)?;
            class.methods.push(Method {
                access_flags,
                name_index,
                descriptor_index,
                attributes: vec![],
            });
            if let (Some(compiler), Some(body)) = (compiler, body) {
                splice::set_body(class, class.methods.len() - 1, compiler.as_ref(), body)?;
            }
            Ok(())
        })?;
        debug!("added method {}.{}{}", self.name(), name, descriptor);
        let slot = MemberSlot::Method(0);
        Ok(self.member(slot, name, descriptor))
    }

    pub fn remove_member(&self, member: &Member) -> Result<(), Error> {
        if !std::ptr::eq(member.declaring_class().as_ref(), self) {
            return Err(Error::NotFound(format!("{:?} in {}", member, self.name())));
        }
        let (name, descriptor) = (member.name(), member.descriptor());
        let description = format!("{:?}", member);
        self.edit(true, |class, initializers| {
            match member.kind() {
                MemberKind::Field => {
                    let idx = find_field(class, name, descriptor)?;
                    class.fields.remove(idx);
                    initializers.retain(|init| init.field_name != name);
                }
                _ => {
                    let idx = class
                        .find_method(name, descriptor)?
                        .ok_or_else(|| Error::NotFound(description.clone()))?;
                    class.methods.remove(idx);
                }
            }
            Ok(())
        })?;
        debug!("removed {}", description);
        Ok(())
    }

    // Output

    /// Serialize the class and refuse further edits until defrosted
    ///
    /// Pending field initializers are woven in first. Freezing again without changes in between
    /// gives back the same bytes; an unmodified class gives back the bytes it was loaded from.
    pub fn freeze(&self) -> Result<Vec<u8>, Error> {
        self.ensure_ordinary()?;
        let compiler = self.registry.upgrade().and_then(|registry| registry.compiler());
        let mut state = self.state.write();
        state.check_readable()?;
        if state.frozen {
            if let Some(output) = &state.output {
                return Ok(output.clone());
            }
        }

        let bytes = match (&state.bytes, state.modified) {
            (Some(bytes), false) if state.initializers.is_empty() => bytes.clone(),
            _ => {
                state.decode()?;
                if state.initializers.is_empty() {
                    state.class()?.to_bytes()?
                } else {
                    let mut class = state.class()?.clone();
                    splice::weave_initializers(
                        &mut class,
                        &state.initializers,
                        compiler.as_deref(),
                    )?;
                    let bytes = class.to_bytes()?;
                    state.class_file = Some(class);
                    state.initializers.clear();
                    state.modified = true;
                    state.generation += 1;
                    bytes
                }
            }
        };
        debug!("froze {} ({} bytes)", state.name, bytes.len());
        state.output = Some(bytes.clone());
        state.frozen = true;
        Ok(bytes)
    }

    /// Freeze, then prune if the registry asks for it
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let auto_prune = self
            .registry
            .upgrade()
            .map_or(false, |registry| registry.auto_prune());
        let bytes = self.freeze()?;
        if auto_prune {
            self.prune()?;
        }
        Ok(bytes)
    }

    /// Freeze and hand the bytes over to a definer
    pub fn register(&self, definer: &impl ClassDefiner) -> Result<(), Error> {
        let bytes = self.to_bytes()?;
        definer.define(&self.name(), &bytes)
    }

    /// Freeze, then drop everything but the name
    ///
    /// Returns `false` (and does nothing) if pruning was stopped or already happened.
    pub fn prune(&self) -> Result<bool, Error> {
        {
            let state = self.state.read();
            if state.stop_pruning || state.pruned {
                return Ok(false);
            }
        }
        self.freeze()?;
        let mut state = self.state.write();
        if state.stop_pruning || state.pruned {
            return Ok(false);
        }
        state.class_file = None;
        state.bytes = None;
        state.output = None;
        state.members = None;
        state.initializers.clear();
        state.pruned = true;
        debug!("pruned {}", state.name);
        Ok(true)
    }

    /// Stop (or allow again) pruning of this entity
    pub fn stop_pruning(&self, stop: bool) {
        self.state.write().stop_pruning = stop;
    }

    /// Allow edits again after a freeze
    pub fn defrost(&self) -> Result<(), Error> {
        let mut state = self.state.write();
        state.check_readable()?;
        state.frozen = false;
        Ok(())
    }

    /// Drop the decoded class if nobody touched it since the last call
    ///
    /// Entities with unsaved edits are left alone. Frozen entities keep their output as the
    /// bytes to decode from next time.
    pub(crate) fn release_if_idle(&self) -> bool {
        if !matches!(self.kind, EntityKind::Ordinary) {
            return false;
        }
        let mut state = self.state.write();
        if state.pruned || state.class_file.is_none() || (state.modified && !state.frozen) {
            return false;
        }
        if self.accessed.swap(false, Ordering::Relaxed) {
            return false;
        }
        if state.frozen {
            state.bytes = state.output.clone();
        }
        if state.bytes.is_none() {
            return false;
        }
        state.class_file = None;
        state.members = None;
        trace!("released decoded form of {}", state.name);
        true
    }
}

fn duplicate(class: &ClassFile, name: &str, descriptor: &str) -> Error {
    let owner = class.name().unwrap_or("?");
    Error::cannot_compile(format!("duplicate member {}.{}:{}", owner, name, descriptor))
}

fn find_field(class: &ClassFile, name: &str, descriptor: &str) -> Result<usize, Error> {
    for (idx, field) in class.fields.iter().enumerate() {
        if field.name(&class.constants)? == name
            && field.descriptor(&class.constants)? == descriptor
        {
            return Ok(idx);
        }
    }
    Err(Error::NotFound(format!(
        "{}.{}:{}",
        class.name()?,
        name,
        descriptor
    )))
}

fn push_field(
    class: &mut ClassFile,
    name: &str,
    descriptor: &str,
    access_flags: FieldAccessFlags,
) -> Result<(), Error> {
    FieldType::parse(descriptor).map_err(|err| {
        Error::cannot_compile(format!("bad field descriptor {}: {}", descriptor, err))
    })?;
    if find_field(class, name, descriptor).is_ok() {
        return Err(duplicate(class, name, descriptor));
    }
    let name_index = class.constants.get_utf8(name)?;
    let descriptor_index = class.constants.get_utf8(descriptor)?;
    class.fields.push(Field {
        access_flags,
        name_index,
        descriptor_index,
        attributes: vec![],
    });
    Ok(())
}

impl fmt::Debug for ClassEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.state.try_read() {
            Some(state) => state.name.clone(),
            None => String::from("<locked>"),
        };
        f.debug_struct("ClassEntity")
            .field("name", &name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entity(name: &str) -> Arc<ClassEntity> {
        let class = ClassFile::new(
            name,
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC,
            Version::JAVA8,
        )
        .unwrap();
        ClassEntity::from_class_file(Weak::new(), class, None).unwrap()
    }

    #[test]
    fn member_cache_follows_structure() {
        let class = entity("a/A");
        assert!(matches!(class.get_member("x", "I"), Err(Error::NotFound(_))));

        let x = class.add_field("x", "I", FieldAccessFlags::PRIVATE).unwrap();
        assert_eq!(class.get_member("x", "I").unwrap(), x);
        assert!(matches!(
            class.add_field("x", "I", FieldAccessFlags::PRIVATE),
            Err(Error::CannotCompile(_))
        ));

        // Flag changes keep the cache, removal drops the member
        let generation = class.state.read().generation;
        x.set_field_flags(FieldAccessFlags::PUBLIC).unwrap();
        assert_eq!(class.state.read().generation, generation);
        class.remove_member(&x).unwrap();
        assert!(matches!(class.get_member("x", "I"), Err(Error::NotFound(_))));
        assert!(class.state.read().generation > generation);
    }

    #[test]
    fn members_in_order() {
        let class = entity("a/B");
        class
            .add_method("run", "()V", MethodAccessFlags::ABSTRACT, None)
            .unwrap();
        class
            .add_method("<init>", "()V", MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE, None)
            .unwrap();
        class.add_field("f", "J", FieldAccessFlags::empty()).unwrap();

        let kinds: Vec<MemberKind> = class.members().unwrap().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![MemberKind::Field, MemberKind::Constructor, MemberKind::Method]
        );
        let last = class.members().unwrap().next_back().unwrap();
        assert_eq!(last.name(), "run");
        assert_eq!(class.constructors().unwrap().len(), 1);
        assert!(class.class_initializer().unwrap().is_none());
    }

    #[test]
    fn lifecycle() {
        let class = entity("a/C");
        let first = class.freeze().unwrap();
        assert_eq!(class.freeze().unwrap(), first);
        assert!(matches!(class.set_version(Version::JAVA5), Err(Error::Frozen(_))));

        class.defrost().unwrap();
        class.set_version(Version::JAVA5).unwrap();
        assert_ne!(class.freeze().unwrap(), first);

        assert!(class.prune().unwrap());
        assert!(matches!(class.defrost(), Err(Error::Pruned(_))));
        assert!(matches!(class.freeze(), Err(Error::Pruned(_))));
        assert!(matches!(class.version(), Err(Error::Pruned(_))));
        assert_eq!(class.name(), "a/C");
    }

    #[test]
    fn initializer_must_fit() {
        let class = entity("a/D");
        assert!(matches!(
            class.add_field_with_initializer(
                "s",
                "I",
                FieldAccessFlags::STATIC,
                FieldInitializer::String("x".to_owned())
            ),
            Err(Error::CannotCompile(_))
        ));
        assert!(class.declared_fields().unwrap().is_empty());
    }

    #[test]
    fn primitive_and_array_kinds() {
        let int = ClassEntity::primitive("int", 'I');
        let array = ClassEntity::array(Weak::new(), int.clone());
        assert_eq!(array.name(), "int[]");
        assert_eq!(array.descriptor(), "[I");
        assert!(array.is_array() && int.is_primitive());
        assert_eq!(
            array.superclass_name().unwrap().as_deref(),
            Some(BinaryName::OBJECT.as_str())
        );
        assert!(matches!(int.freeze(), Err(Error::CannotCompile(_))));
        assert!(array.members().unwrap().next().is_none());
    }
}
