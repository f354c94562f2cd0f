//! Instruction decoding on top of rspirv's grammar-driven binary parser.
//!
//! rspirv resolves every operand kind, including parameterized enums,
//! `OpSpecConstantOp` payloads and context-dependent literals. Its data
//! representation is flattened here into [`Instruction`]s: ids stay ids,
//! strings stay strings, and every other operand becomes its literal words.

use super::instruction::{Instruction, Operand};
use super::Section;
use crate::error::{Result, TranslateError};
use rspirv::binary::{parse_words, Assemble, Consumer, ParseAction, ParseState};
use rspirv::dr;
use rspirv::grammar::{reflect, CoreInstructionTable, OperandKind};
use spirv::{Op, Word};

/// Result shape of an opcode, from the core grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shape {
    pub result_type: bool,
    pub result_id: bool,
}

pub(crate) fn shape(op: Op) -> Option<Shape> {
    let grammar = CoreInstructionTable::lookup_opcode(op as u16)?;
    let has = |kind: OperandKind| grammar.operands.iter().any(|operand| operand.kind == kind);
    Some(Shape {
        result_type: has(OperandKind::IdResultType),
        result_id: has(OperandKind::IdResult),
    })
}

/// Decode every instruction of the module in `words` (header included) and
/// hand each one to `sink`, stopping at the first error.
pub(crate) fn decode_instructions<F>(words: &[Word], sink: F) -> Result<()>
where
    F: FnMut(Instruction) -> Result<()>,
{
    let mut forward = Forward {
        sink,
        index: 0,
        error: None,
    };
    match parse_words(words, &mut forward) {
        Ok(()) => Ok(()),
        Err(ParseState::ConsumerStopRequested) => match forward.error {
            Some(error) => Err(error),
            None => Err(crate::err_format!("Decoding stopped early")),
        },
        Err(state) => Err(crate::err_format!("{}", state)),
    }
}

struct Forward<F> {
    sink: F,
    index: usize,
    error: Option<TranslateError>,
}

impl<F> Consumer for Forward<F>
where
    F: FnMut(Instruction) -> Result<()>,
{
    fn initialize(&mut self) -> ParseAction {
        ParseAction::Continue
    }

    fn finalize(&mut self) -> ParseAction {
        ParseAction::Continue
    }

    fn consume_header(&mut self, _header: dr::ModuleHeader) -> ParseAction {
        ParseAction::Continue
    }

    fn consume_instruction(&mut self, inst: dr::Instruction) -> ParseAction {
        self.index += 1;
        match (self.sink)(convert(inst)) {
            Ok(()) => ParseAction::Continue,
            Err(TranslateError::FormatError(message)) => {
                self.error = Some(crate::err_format!("Instruction #{}: {}", self.index, message));
                ParseAction::Stop
            }
            Err(error) => {
                self.error = Some(error);
                ParseAction::Stop
            }
        }
    }
}

fn convert(inst: dr::Instruction) -> Instruction {
    let mut operands = Vec::with_capacity(inst.operands.len());
    for operand in inst.operands {
        match operand {
            dr::Operand::IdRef(id) | dr::Operand::IdScope(id) | dr::Operand::IdMemorySemantics(id) => {
                operands.push(Operand::Id(id))
            }
            dr::Operand::LiteralString(s) => operands.push(Operand::String(s)),
            other => operands.extend(other.assemble().into_iter().map(Operand::Literal)),
        }
    }
    Instruction::new(inst.class.opcode, inst.result_type, inst.result_id, operands)
}

/// Logical-layout section an instruction belongs to when it appears outside
/// a function. `None` means the instruction is only valid inside functions.
pub(crate) fn global_section(op: Op) -> Option<Section> {
    let section = match op {
        Op::Capability => Section::Capabilities,
        Op::Extension => Section::Extensions,
        Op::ExtInstImport => Section::ExtInstImports,
        Op::MemoryModel => Section::MemoryModel,
        Op::EntryPoint => Section::EntryPoints,
        Op::ExecutionMode | Op::ExecutionModeId => Section::ExecutionModes,
        Op::String | Op::SourceExtension | Op::Source | Op::SourceContinued => {
            Section::DebugSource
        }
        Op::Name | Op::MemberName => Section::DebugNames,
        Op::ModuleProcessed => Section::ModuleProcessed,
        Op::DecorateId | Op::MemberDecorateString => Section::Annotations,
        op if reflect::is_annotation(op) => Section::Annotations,
        Op::Variable | Op::Undef => Section::TypesGlobalValues,
        op if reflect::is_location_debug(op) => Section::TypesGlobalValues,
        op if reflect::is_type(op) || reflect::is_constant(op) => Section::TypesGlobalValues,
        _ => return None,
    };
    Some(section)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(words: &[Word]) -> Result<Vec<Instruction>> {
        let mut header = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, 100, 0];
        header.extend_from_slice(words);
        let mut out = Vec::new();
        decode_instructions(&header, |inst| {
            out.push(inst);
            Ok(())
        })?;
        Ok(out)
    }

    fn word(op: Op, count: u32) -> Word {
        (count << 16) | op as Word
    }

    #[test]
    fn test_decode_entry_point() {
        let name = u32::from_le_bytes(*b"main");
        let insts = decode(&[word(Op::EntryPoint, 7), 5, 4, name, 0, 9, 10]).unwrap();
        assert_eq!(
            insts[0].operands,
            vec![
                Operand::Literal(5),
                Operand::Id(4),
                Operand::String("main".into()),
                Operand::Id(9),
                Operand::Id(10),
            ]
        );
    }

    #[test]
    fn test_decode_aligned_load() {
        // OpLoad %1 %2 %12 Aligned 4
        let insts = decode(&[word(Op::Load, 6), 1, 2, 12, 0x2, 4]).unwrap();
        assert_eq!(insts[0].result_type, Some(1));
        assert_eq!(insts[0].result_id, Some(2));
        assert_eq!(
            insts[0].operands,
            vec![Operand::Id(12), Operand::Literal(2), Operand::Literal(4)]
        );
    }

    #[test]
    fn test_decode_builtin_decoration() {
        // OpDecorate %7 BuiltIn GlobalInvocationId
        let insts = decode(&[word(Op::Decorate, 4), 7, 11, 28]).unwrap();
        assert_eq!(
            insts[0].operands,
            vec![Operand::Id(7), Operand::Literal(11), Operand::Literal(28)]
        );
    }

    #[test]
    fn test_decode_spec_constant_op_keeps_literal_indices() {
        // OpSpecConstantOp %1 %3 CompositeExtract %2 0
        let extract = Op::CompositeExtract as Word;
        let insts = decode(&[word(Op::SpecConstantOp, 6), 1, 3, extract, 2, 0]).unwrap();
        assert_eq!(
            insts[0].operands,
            vec![Operand::Literal(extract), Operand::Id(2), Operand::Literal(0)]
        );
        assert_eq!(insts[0].referenced_ids().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_decode_unterminated_string() {
        let abcd = u32::from_le_bytes(*b"abcd");
        assert!(decode(&[word(Op::Extension, 2), abcd]).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_and_trailing_words() {
        assert!(decode(&[word(Op::IAdd, 4), 1, 2, 3]).is_err());
        assert!(decode(&[word(Op::IAdd, 6), 1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_sink_errors_are_returned() {
        let result = decode_instructions(
            &[spirv::MAGIC_NUMBER, 0x0001_0000, 0, 4, 0, word(Op::Nop, 1)],
            |_| Err(TranslateError::IdentifierError("rejected".into())),
        );
        assert_eq!(result, Err(TranslateError::IdentifierError("rejected".into())));
    }

    #[test]
    fn test_shapes() {
        assert_eq!(
            shape(Op::IAdd),
            Some(Shape {
                result_type: true,
                result_id: true
            })
        );
        assert_eq!(
            shape(Op::Label),
            Some(Shape {
                result_type: false,
                result_id: true
            })
        );
        assert_eq!(
            shape(Op::Store),
            Some(Shape {
                result_type: false,
                result_id: false
            })
        );
    }

    #[test]
    fn test_sections() {
        assert_eq!(global_section(Op::TypeInt), Some(Section::TypesGlobalValues));
        assert_eq!(global_section(Op::SpecConstantOp), Some(Section::TypesGlobalValues));
        assert_eq!(global_section(Op::Name), Some(Section::DebugNames));
        assert_eq!(global_section(Op::GroupDecorate), Some(Section::Annotations));
        assert_eq!(global_section(Op::IAdd), None);
        assert_eq!(global_section(Op::GroupBroadcast), None);
    }
}
