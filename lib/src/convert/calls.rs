use super::{internal, referenced_member, set_operand, TransformContext, Transformer};
use crate::jvm::class_file::{MemberRef, MemberRefKind};
use crate::jvm::code::opcodes;
use crate::jvm::code::{CodeEditor, Instruction, InvokeType, Item};
use crate::jvm::{Error, FieldType, MethodDescriptor, ParseDescriptor};

/// Method picked out by its class, name, and descriptor
#[derive(Clone, Debug)]
struct MethodTarget {
    class: String,
    name: String,
    descriptor: String,
}

impl MethodTarget {
    fn new(class: &str, name: &str, descriptor: &str) -> MethodTarget {
        MethodTarget {
            class: internal(class),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }

    fn matches(&self, member: &MemberRef) -> bool {
        member.kind != MemberRefKind::Field
            && member.class == self.class
            && member.name == self.name
            && member.descriptor == self.descriptor
    }

    /// Opcode of the instruction, and whether its reference is to an interface method, if it
    /// calls this method
    fn called_by(
        &self,
        item: &Item,
        context: &TransformContext,
    ) -> Result<Option<(u8, bool)>, Error> {
        Ok(match referenced_member(item, &*context.constants)? {
            Some((opcode, member)) if self.matches(&member) => {
                Some((opcode, member.kind == MemberRefKind::InterfaceMethod))
            }
            _ => None,
        })
    }
}

/// Make calls to a method go to another method with the same descriptor
///
/// The kind of call is kept, so the substitute must be callable the same way: a static method
/// for static calls, an instance method of a compatible class otherwise.
#[derive(Clone, Debug)]
pub struct RedirectMethodCall {
    target: MethodTarget,
    new_class: String,
    new_name: String,
}

impl RedirectMethodCall {
    pub fn new(
        class: &str,
        name: &str,
        descriptor: &str,
        new_class: &str,
        new_name: &str,
    ) -> RedirectMethodCall {
        RedirectMethodCall {
            target: MethodTarget::new(class, name, descriptor),
            new_class: internal(new_class),
            new_name: new_name.to_owned(),
        }
    }
}

impl Transformer for RedirectMethodCall {
    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error> {
        if let Some((_, is_interface)) = self.target.called_by(&editor.items[index], context)? {
            let method = context.constants.get_method_ref(
                &self.new_class,
                &self.new_name,
                &self.target.descriptor,
                is_interface,
            )?;
            set_operand(&mut editor.items[index], method.0 .0);
            context.mark_changed();
        }
        Ok(index)
    }
}

/// Call a static hook right before every call to a method
///
/// The hook gets the receiver (unless the call is static) followed by the arguments of the call:
/// `static void hook(C receiver, A1 a1, ..)`. The receiver and arguments are saved to fresh
/// locals, passed to the hook, and loaded again for the original call.
#[derive(Clone, Debug)]
pub struct InsertBeforeCall {
    target: MethodTarget,
    parameters: Vec<FieldType>,
    hook_class: String,
    hook_method: String,
}

impl InsertBeforeCall {
    pub fn new(
        class: &str,
        name: &str,
        descriptor: &str,
        hook_class: &str,
        hook_method: &str,
    ) -> Result<InsertBeforeCall, Error> {
        if name == "<init>" {
            return Err(Error::cannot_compile(format!(
                "calls to constructors of {} cannot be preceded by a hook",
                class
            )));
        }
        let parsed = MethodDescriptor::parse(descriptor).map_err(|err| {
            Error::malformed(format!("bad method descriptor {}: {}", descriptor, err))
        })?;
        Ok(InsertBeforeCall {
            target: MethodTarget::new(class, name, descriptor),
            parameters: parsed.parameters,
            hook_class: internal(hook_class),
            hook_method: hook_method.to_owned(),
        })
    }

    /// Parameter part of the target descriptor, without the parentheses
    fn parameter_descriptors(&self) -> &str {
        let descriptor = self.target.descriptor.as_str();
        let end = descriptor.find(')').unwrap_or(descriptor.len());
        descriptor.get(1..end).unwrap_or("")
    }

    /// Loads of the saved receiver (if any) and arguments
    fn reload(&self, base: u16, receiver: bool, slots: &[u16]) -> Vec<Item> {
        let mut items = Vec::with_capacity(self.parameters.len() + 1);
        if receiver {
            items.push(Instruction::ALoad(base).into());
        }
        for (parameter, slot) in self.parameters.iter().zip(slots) {
            items.push(Instruction::load(parameter.value_kind(), base + slot).into());
        }
        items
    }
}

impl Transformer for InsertBeforeCall {
    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error> {
        let opcode = match self.target.called_by(&editor.items[index], context)? {
            Some((opcode, _)) => opcode,
            None => return Ok(index),
        };
        let receiver = opcode != opcodes::INVOKESTATIC;
        let hook_descriptor = if receiver {
            format!("(L{};{})V", self.target.class, self.parameter_descriptors())
        } else {
            format!("({})V", self.parameter_descriptors())
        };
        let hook = context.constants.get_method_ref(
            &self.hook_class,
            &self.hook_method,
            &hook_descriptor,
            false,
        )?;

        // Receiver in the first slot, arguments after it
        let base = context.free_local;
        let slots: Vec<u16> = MethodDescriptor {
            parameters: self.parameters.clone(),
            return_type: None,
        }
        .parameter_slots(true);

        let mut prefix: Vec<Item> = vec![];
        for (parameter, slot) in self.parameters.iter().zip(&slots).rev() {
            prefix.push(Instruction::store(parameter.value_kind(), base + slot).into());
        }
        if receiver {
            prefix.push(Instruction::AStore(base).into());
        }
        prefix.extend(self.reload(base, receiver, &slots));
        prefix.push(Instruction::Invoke(InvokeType::Static, hook).into());
        prefix.extend(self.reload(base, receiver, &slots));

        let call = index + prefix.len();
        editor.items.splice(index..index, prefix);
        context.mark_changed();
        Ok(call)
    }

    fn extra_locals(&self) -> u16 {
        let slots: usize = self.parameters.iter().map(|parameter| parameter.width()).sum();
        1 + slots as u16
    }
}
