use std::fmt;

/// Opaque position in a method body, resolved to an offset only when the body is laid out
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(u32);

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Source of labels that are distinct from every label it handed out before
pub trait LabelGenerator<L> {
    fn fresh_label(&mut self) -> L;
}

/// Labels numbered from zero
///
/// A clone continues the same numbering, so its labels clash with those of the original.
#[derive(Clone, Debug, Default)]
pub struct SequentialLabels {
    handed_out: u32,
}

impl SequentialLabels {
    pub fn new() -> SequentialLabels {
        SequentialLabels::default()
    }
}

impl LabelGenerator<Label> for SequentialLabels {
    fn fresh_label(&mut self) -> Label {
        let label = Label(self.handed_out);
        self.handed_out += 1;
        label
    }
}
