use spirv::{Op, Word};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Id(Word),
    Literal(Word),
    String(String),
}

impl Operand {
    pub fn as_id(&self) -> Option<Word> {
        match self {
            Operand::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<Word> {
        match self {
            Operand::Literal(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number of words this operand occupies in the binary form.
    pub fn word_count(&self) -> usize {
        match self {
            Operand::Id(_) | Operand::Literal(_) => 1,
            // Strings are nul-terminated and padded to a whole word.
            Operand::String(s) => s.len() / 4 + 1,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<Word>) {
        match self {
            Operand::Id(word) | Operand::Literal(word) => out.push(*word),
            Operand::String(s) => {
                let bytes = s.as_bytes();
                for chunk_start in (0..=bytes.len()).step_by(4) {
                    let mut word = [0u8; 4];
                    for (i, byte) in bytes[chunk_start..].iter().take(4).enumerate() {
                        word[i] = *byte;
                    }
                    out.push(Word::from_le_bytes(word));
                }
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Id(id) => write!(f, "%{}", id),
            Operand::Literal(value) => write!(f, "{}", value),
            Operand::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// A single SPIR-V instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Op,
    pub result_type: Option<Word>,
    pub result_id: Option<Word>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(
        opcode: Op,
        result_type: Option<Word>,
        result_id: Option<Word>,
        operands: Vec<Operand>,
    ) -> Self {
        Instruction {
            opcode,
            result_type,
            result_id,
            operands,
        }
    }

    pub fn word_count(&self) -> usize {
        1 + usize::from(self.result_type.is_some())
            + usize::from(self.result_id.is_some())
            + self.operands.iter().map(Operand::word_count).sum::<usize>()
    }

    /// Every identifier this instruction references, result type first.
    pub fn referenced_ids(&self) -> impl Iterator<Item = Word> + '_ {
        self.result_type
            .into_iter()
            .chain(self.operands.iter().filter_map(Operand::as_id))
    }

    /// Rewrite every referenced identifier (not the result id) through `f`.
    pub fn map_ids(&mut self, mut f: impl FnMut(Word) -> Word) {
        if let Some(ty) = self.result_type.as_mut() {
            *ty = f(*ty);
        }
        for operand in &mut self.operands {
            if let Operand::Id(id) = operand {
                *id = f(*id);
            }
        }
    }

    pub fn is_terminator(&self) -> bool {
        is_terminator(self.opcode)
    }
}

pub fn is_terminator(op: Op) -> bool {
    matches!(
        op,
        Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable
            | Op::TerminateInvocation
    )
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.result_id {
            write!(f, "%{} = ", id)?;
        }
        write!(f, "Op{:?}", self.opcode)?;
        if let Some(ty) = self.result_type {
            write!(f, " %{}", ty)?;
        }
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_word_count_includes_terminator() {
        assert_eq!(Operand::String(String::new()).word_count(), 1);
        assert_eq!(Operand::String("abc".into()).word_count(), 1);
        assert_eq!(Operand::String("abcd".into()).word_count(), 2);
    }

    #[test]
    fn test_string_encoding_is_padded() {
        let mut out = Vec::new();
        Operand::String("main".into()).encode(&mut out);
        assert_eq!(out, vec![u32::from_le_bytes(*b"main"), 0]);
    }

    #[test]
    fn test_display() {
        let inst = Instruction::new(Op::Load, Some(3), Some(7), vec![Operand::Id(5)]);
        assert_eq!(inst.to_string(), "%7 = OpLoad %3 %5");
        assert_eq!(inst.word_count(), 4);
    }
}
