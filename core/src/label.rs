/// A branch target inside one block's host code.
///
/// Supports forward references: jumps can be emitted against a label
/// before it is placed, and the code generator back-patches them when
/// the label is bound.
#[derive(Debug, Clone, Default)]
pub struct Label {
    /// Bound host offset, once placed.
    pub value: Option<usize>,
    /// Forward references waiting for the label to be bound.
    pub uses: Vec<LabelUse>,
}

/// A reference to a label from an emitted jump.
#[derive(Debug, Clone, Copy)]
pub struct LabelUse {
    /// Offset of the displacement field in the code buffer.
    pub offset: usize,
    pub kind: RelocKind,
}

/// Relocation types for label back-patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// x86-64 32-bit displacement relative to the end of the field.
    Rel32,
}

impl Label {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_use(&mut self, offset: usize, kind: RelocKind) {
        self.uses.push(LabelUse { offset, kind });
    }

    /// Mark the label as placed, returning the uses to patch.
    pub fn bind(&mut self, offset: usize) -> Vec<LabelUse> {
        assert!(self.value.is_none(), "label bound twice");
        self.value = Some(offset);
        std::mem::take(&mut self.uses)
    }

    pub fn is_bound(&self) -> bool {
        self.value.is_some()
    }

    /// Whether there are unresolved forward references.
    pub fn has_pending_uses(&self) -> bool {
        !self.uses.is_empty()
    }
}
