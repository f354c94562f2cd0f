//! Builder: the single place that mints identifiers and inserts instructions
//! into a [`Module`].
//!
//! Types, constants, builtin global variables and extended-instruction
//! imports are interned: asking twice for a structurally equal declaration
//! returns the same id, including declarations that were already present when
//! the module was parsed.

mod cache;

#[cfg(test)]
mod tests;

pub use cache::InternCache;

use crate::error::Result;
use crate::module::decode::shape;
use crate::module::{Instruction, Module, Operand};
use crate::{bail_format, bail_id};
use log::debug;
use spirv::{BuiltIn, Decoration, Op, StorageClass, Word};

/// Structural description of a type the builder can declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: Word, count: u32 },
    Pointer { storage: StorageClass, pointee: Word },
    Function { ret: Word, params: Vec<Word> },
}

impl TypeDesc {
    pub fn uint() -> Self {
        TypeDesc::Int {
            width: 32,
            signed: false,
        }
    }

    fn declaration(&self, id: Word) -> Instruction {
        let (opcode, operands) = match self {
            TypeDesc::Void => (Op::TypeVoid, vec![]),
            TypeDesc::Bool => (Op::TypeBool, vec![]),
            TypeDesc::Int { width, signed } => (
                Op::TypeInt,
                vec![Operand::Literal(*width), Operand::Literal(u32::from(*signed))],
            ),
            TypeDesc::Float { width } => (Op::TypeFloat, vec![Operand::Literal(*width)]),
            TypeDesc::Vector { component, count } => (
                Op::TypeVector,
                vec![Operand::Id(*component), Operand::Literal(*count)],
            ),
            TypeDesc::Pointer { storage, pointee } => (
                Op::TypePointer,
                vec![Operand::Literal(*storage as Word), Operand::Id(*pointee)],
            ),
            TypeDesc::Function { ret, params } => (
                Op::TypeFunction,
                std::iter::once(*ret).chain(params.iter().copied()).map(Operand::Id).collect(),
            ),
        };
        Instruction::new(opcode, None, Some(id), operands)
    }

    /// Recover the description of an existing type declaration.
    pub fn from_declaration(inst: &Instruction) -> Option<Self> {
        let lit = |i: usize| inst.operands.get(i).and_then(Operand::as_literal);
        let id = |i: usize| inst.operands.get(i).and_then(Operand::as_id);
        let desc = match inst.opcode {
            Op::TypeVoid => TypeDesc::Void,
            Op::TypeBool => TypeDesc::Bool,
            Op::TypeInt => TypeDesc::Int {
                width: lit(0)?,
                signed: lit(1)? != 0,
            },
            Op::TypeFloat => TypeDesc::Float { width: lit(0)? },
            Op::TypeVector => TypeDesc::Vector {
                component: id(0)?,
                count: lit(1)?,
            },
            Op::TypePointer => TypeDesc::Pointer {
                storage: StorageClass::from_u32(lit(0)?)?,
                pointee: id(1)?,
            },
            Op::TypeFunction => TypeDesc::Function {
                ret: id(0)?,
                params: inst.operands[1..]
                    .iter()
                    .map(Operand::as_id)
                    .collect::<Option<Vec<_>>>()?,
            },
            _ => return None,
        };
        Some(desc)
    }

    fn referenced_ids(&self) -> Vec<Word> {
        match self {
            TypeDesc::Vector { component, .. } => vec![*component],
            TypeDesc::Pointer { pointee, .. } => vec![*pointee],
            TypeDesc::Function { ret, params } => std::iter::once(*ret).chain(params.iter().copied()).collect(),
            _ => vec![],
        }
    }
}

/// Structural description of a constant the builder can declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantDesc {
    Bool { ty: Word, value: bool },
    /// Scalar bit pattern, low-order word first.
    Scalar { ty: Word, bits: Vec<Word> },
    Composite { ty: Word, parts: Vec<Word> },
    Null { ty: Word },
}

impl ConstantDesc {
    pub fn u32(ty: Word, value: u32) -> Self {
        ConstantDesc::Scalar {
            ty,
            bits: vec![value],
        }
    }

    pub fn ty(&self) -> Word {
        match self {
            ConstantDesc::Bool { ty, .. }
            | ConstantDesc::Scalar { ty, .. }
            | ConstantDesc::Composite { ty, .. }
            | ConstantDesc::Null { ty } => *ty,
        }
    }

    fn declaration(&self, id: Word) -> Instruction {
        let (opcode, operands) = match self {
            ConstantDesc::Bool { value: true, .. } => (Op::ConstantTrue, vec![]),
            ConstantDesc::Bool { value: false, .. } => (Op::ConstantFalse, vec![]),
            ConstantDesc::Scalar { bits, .. } => {
                (Op::Constant, bits.iter().copied().map(Operand::Literal).collect())
            }
            ConstantDesc::Composite { parts, .. } => {
                (Op::ConstantComposite, parts.iter().copied().map(Operand::Id).collect())
            }
            ConstantDesc::Null { .. } => (Op::ConstantNull, vec![]),
        };
        Instruction::new(opcode, Some(self.ty()), Some(id), operands)
    }

    pub fn from_declaration(inst: &Instruction) -> Option<Self> {
        let ty = inst.result_type?;
        let desc = match inst.opcode {
            Op::ConstantTrue => ConstantDesc::Bool { ty, value: true },
            Op::ConstantFalse => ConstantDesc::Bool { ty, value: false },
            Op::Constant => ConstantDesc::Scalar {
                ty,
                bits: inst
                    .operands
                    .iter()
                    .map(Operand::as_literal)
                    .collect::<Option<Vec<_>>>()?,
            },
            Op::ConstantComposite => ConstantDesc::Composite {
                ty,
                parts: inst
                    .operands
                    .iter()
                    .map(Operand::as_id)
                    .collect::<Option<Vec<_>>>()?,
            },
            Op::ConstantNull => ConstantDesc::Null { ty },
            _ => return None,
        };
        Some(desc)
    }

    fn referenced_ids(&self) -> Vec<Word> {
        match self {
            ConstantDesc::Composite { ty, parts } => std::iter::once(*ty).chain(parts.iter().copied()).collect(),
            _ => vec![self.ty()],
        }
    }
}

/// Semantic role that identifies a module-scope variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalRole {
    BuiltIn(BuiltIn),
}

type GlobalKey = (StorageClass, GlobalRole);

/// Where [`Builder::insert`] puts the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPoint {
    pub function: usize,
    pub block: usize,
    pub index: usize,
}

pub struct Builder<'m> {
    module: &'m mut Module,
    types: InternCache<TypeDesc>,
    constants: InternCache<ConstantDesc>,
    globals: InternCache<GlobalKey>,
    imports: InternCache<String>,
    insert_point: Option<InsertPoint>,
}

impl<'m> Builder<'m> {
    /// Bind a builder to `module`, indexing the declarations it already has.
    pub fn new(module: &'m mut Module) -> Self {
        let mut types = InternCache::new();
        let mut constants = InternCache::new();
        let mut globals = InternCache::new();
        let mut imports = InternCache::new();

        for inst in &module.types_global_values {
            let Some(id) = inst.result_id else { continue };
            if let Some(desc) = TypeDesc::from_declaration(inst) {
                types.seed(desc, id);
            } else if let Some(desc) = ConstantDesc::from_declaration(inst) {
                constants.seed(desc, id);
            }
        }

        for inst in &module.ext_inst_imports {
            if let (Some(id), Some(name)) = (inst.result_id, inst.operands.first().and_then(Operand::as_str)) {
                imports.seed(name.to_string(), id);
            }
        }

        for (target, builtin) in builtin_decorations(module) {
            let storage = module
                .types_global_values
                .iter()
                .find(|inst| inst.opcode == Op::Variable && inst.result_id == Some(target))
                .and_then(|inst| inst.operands.first())
                .and_then(Operand::as_literal)
                .and_then(StorageClass::from_u32);
            if let Some(storage) = storage {
                globals.seed((storage, GlobalRole::BuiltIn(builtin)), target);
            }
        }

        debug!(
            "Builder indexed {} type(s), {} constant(s), {} builtin variable(s), {} import(s)",
            types.len(),
            constants.len(),
            globals.len(),
            imports.len()
        );

        Builder {
            module,
            types,
            constants,
            globals,
            imports,
            insert_point: None,
        }
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    /// A fresh, never used identifier. Fails only once the 32-bit id space
    /// is exhausted.
    pub fn id(&mut self) -> Result<Word> {
        self.module.allocate_id()
    }

    pub fn type_id(&mut self, desc: &TypeDesc) -> Result<Word> {
        self.types
            .get_or_try_insert_with(desc, &mut *self.module, |module, desc| {
                check_defined(module, &desc.referenced_ids())?;
                let id = module.allocate_id()?;
                module.types_global_values.push(desc.declaration(id));
                debug!("Declared type %{} = {:?}", id, desc);
                Ok(id)
            })
    }

    pub fn constant_id(&mut self, desc: &ConstantDesc) -> Result<Word> {
        self.constants
            .get_or_try_insert_with(desc, &mut *self.module, |module, desc| {
                check_defined(module, &desc.referenced_ids())?;
                let id = module.allocate_id()?;
                module.types_global_values.push(desc.declaration(id));
                debug!("Declared constant %{} = {:?}", id, desc);
                Ok(id)
            })
    }

    pub fn constant_u32(&mut self, value: u32) -> Result<Word> {
        let uint = self.type_id(&TypeDesc::uint())?;
        self.constant_id(&ConstantDesc::u32(uint, value))
    }

    /// Module-scope variable identified by `(storage, role)`, declared on
    /// first request. Builtin roles also get their `BuiltIn` decoration.
    pub fn global_variable(
        &mut self,
        pointer_type: Word,
        storage: StorageClass,
        role: GlobalRole,
    ) -> Result<Word> {
        self.globals
            .get_or_try_insert_with(&(storage, role), &mut *self.module, |module, _| {
                check_defined(module, &[pointer_type])?;
                let id = module.allocate_id()?;
                module.types_global_values.push(Instruction::new(
                    Op::Variable,
                    Some(pointer_type),
                    Some(id),
                    vec![Operand::Literal(storage as Word)],
                ));
                match role {
                    GlobalRole::BuiltIn(builtin) => module.annotations.push(Instruction::new(
                        Op::Decorate,
                        None,
                        None,
                        vec![
                            Operand::Id(id),
                            Operand::Literal(Decoration::BuiltIn as Word),
                            Operand::Literal(builtin as Word),
                        ],
                    )),
                }
                debug!("Declared {:?} variable %{} for {:?}", storage, id, role);
                Ok(id)
            })
    }

    pub fn ext_inst_import(&mut self, name: &str) -> Result<Word> {
        self.imports
            .get_or_try_insert_with(&name.to_string(), &mut *self.module, |module, name| {
                let id = module.allocate_id()?;
                module.ext_inst_imports.push(Instruction::new(
                    Op::ExtInstImport,
                    None,
                    Some(id),
                    vec![Operand::String(name.clone())],
                ));
                Ok(id)
            })
    }

    pub fn name(&mut self, target: Word, name: impl Into<String>) {
        self.module.debug_names.push(Instruction::new(
            Op::Name,
            None,
            None,
            vec![Operand::Id(target), Operand::String(name.into())],
        ));
    }

    /// Add `variable` to the interface list of the entry point for `function`.
    pub fn add_to_interface(&mut self, function: Word, variable: Word) {
        for entry in &mut self.module.entry_points {
            if entry.operands.get(1).and_then(Operand::as_id) != Some(function) {
                continue;
            }
            if !entry.operands.iter().skip(3).any(|op| op.as_id() == Some(variable)) {
                entry.operands.push(Operand::Id(variable));
            }
        }
    }

    /// Start inserting at the beginning of `block` of `function`.
    pub fn select_block(&mut self, function: usize, block: usize) -> Result<()> {
        let exists = self
            .module
            .functions
            .get(function)
            .is_some_and(|f| block < f.blocks.len());
        if !exists {
            bail_format!("No block {} in function {}", block, function);
        }
        self.insert_point = Some(InsertPoint {
            function,
            block,
            index: 0,
        });
        Ok(())
    }

    pub fn set_position(&mut self, index: usize) -> Result<()> {
        let Some(point) = self.insert_point.as_mut() else {
            bail_format!("No block selected");
        };
        let len = self.module.functions[point.function].blocks[point.block].instructions.len();
        if index > len {
            bail_format!("Insert position {} is past the end of the block ({})", index, len);
        }
        point.index = index;
        Ok(())
    }

    pub fn insert_point(&self) -> Option<InsertPoint> {
        self.insert_point
    }

    /// Insert an instruction at the current insertion point and advance past
    /// it. A result id is minted when the opcode produces one.
    pub fn insert(
        &mut self,
        opcode: Op,
        result_type: Option<Word>,
        operands: Vec<Operand>,
    ) -> Result<Option<Word>> {
        let Some(point) = self.insert_point else {
            bail_format!("No block selected");
        };
        let Some(form) = shape(opcode) else {
            bail_format!("Unsupported instruction Op{:?}", opcode);
        };
        if form.result_type != result_type.is_some() {
            bail_format!("Op{:?} result type mismatch", opcode);
        }

        let instructions = &self.module.functions[point.function].blocks[point.block].instructions;
        if point.index > 0 && instructions[point.index - 1].is_terminator() {
            bail_format!("Cannot insert Op{:?} after a block terminator", opcode);
        }

        let result_id = if form.result_id {
            Some(self.module.allocate_id()?)
        } else {
            None
        };
        let inst = Instruction::new(opcode, result_type, result_id, operands);
        debug!("Inserting {}", inst);
        self.module.functions[point.function].blocks[point.block]
            .instructions
            .insert(point.index, inst);
        if let Some(point) = self.insert_point.as_mut() {
            point.index += 1;
        }
        Ok(result_id)
    }

    /// Remove and return the instruction at the insertion point.
    pub fn remove_current(&mut self) -> Result<Instruction> {
        let Some(point) = self.insert_point else {
            bail_format!("No block selected");
        };
        let instructions = &mut self.module.functions[point.function].blocks[point.block].instructions;
        if point.index >= instructions.len() {
            bail_format!("Nothing to remove at position {}", point.index);
        }
        Ok(instructions.remove(point.index))
    }

    fn insert_value(&mut self, opcode: Op, result_type: Word, operands: Vec<Operand>) -> Result<Word> {
        match self.insert(opcode, Some(result_type), operands)? {
            Some(id) => Ok(id),
            None => bail_format!("Op{:?} produces no value", opcode),
        }
    }

    pub fn load(&mut self, result_type: Word, pointer: Word) -> Result<Word> {
        self.insert_value(Op::Load, result_type, vec![Operand::Id(pointer)])
    }

    pub fn access_chain(&mut self, result_type: Word, base: Word, indices: &[Word]) -> Result<Word> {
        let operands = std::iter::once(base).chain(indices.iter().copied()).map(Operand::Id).collect();
        self.insert_value(Op::AccessChain, result_type, operands)
    }

    pub fn composite_construct(&mut self, result_type: Word, parts: &[Word]) -> Result<Word> {
        self.insert_value(
            Op::CompositeConstruct,
            result_type,
            parts.iter().copied().map(Operand::Id).collect(),
        )
    }

    pub fn ext_inst(&mut self, result_type: Word, set: Word, instruction: u32, args: &[Word]) -> Result<Word> {
        let operands = [Operand::Id(set), Operand::Literal(instruction)]
            .into_iter()
            .chain(args.iter().copied().map(Operand::Id))
            .collect();
        self.insert_value(Op::ExtInst, result_type, operands)
    }

    pub fn unary(&mut self, opcode: Op, result_type: Word, operand: Word) -> Result<Word> {
        self.insert_value(opcode, result_type, vec![Operand::Id(operand)])
    }

    pub fn binary(&mut self, opcode: Op, result_type: Word, lhs: Word, rhs: Word) -> Result<Word> {
        self.insert_value(opcode, result_type, vec![Operand::Id(lhs), Operand::Id(rhs)])
    }
}

fn builtin_decorations(module: &Module) -> Vec<(Word, BuiltIn)> {
    module
        .annotations
        .iter()
        .filter(|inst| inst.opcode == Op::Decorate)
        .filter(|inst| inst.operands.get(1).and_then(Operand::as_literal) == Some(Decoration::BuiltIn as Word))
        .filter_map(|inst| {
            let target = inst.operands.first()?.as_id()?;
            let builtin = BuiltIn::from_u32(inst.operands.get(2)?.as_literal()?)?;
            Some((target, builtin))
        })
        .collect()
}

fn check_defined(module: &Module, ids: &[Word]) -> Result<()> {
    for id in ids {
        if module.global_def(*id).is_none() {
            bail_id!("Declaration refers to %{} which is not a module-scope definition", id);
        }
    }
    Ok(())
}
