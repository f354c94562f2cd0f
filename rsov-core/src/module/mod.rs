//! In-memory SPIR-V module: parsing, serialization and structural queries.
//!
//! A [`Module`] keeps instructions grouped by logical-layout section, and
//! function bodies as blocks. Identifiers are plain words; the
//! [`IdTable`] returned by [`Module::validate_ids`] maps each one back to the
//! site that defines it.

pub(crate) mod decode;
mod instruction;


pub use instruction::{is_terminator, Instruction, Operand};

use crate::error::Result;
use crate::word_stream::{InputWordStream, OutputWordStream};
use crate::{bail_format, bail_id};
use log::{debug, trace};
use spirv::{Op, Word};
use std::collections::HashMap;

/// The only binary version this crate reads and writes (SPIR-V 1.0).
pub const SUPPORTED_VERSION: Word = 0x0001_0000;

const HEADER_WORDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: Word,
    pub version: Word,
    pub generator: Word,
    pub bound: Word,
    pub schema: Word,
}

impl Header {
    pub fn new(bound: Word) -> Self {
        Header {
            magic: spirv::MAGIC_NUMBER,
            version: SUPPORTED_VERSION,
            generator: 0,
            bound,
            schema: 0,
        }
    }

    fn parse(stream: &mut InputWordStream) -> Result<Self> {
        let words = stream
            .read_n(HEADER_WORDS)
            .map_err(|_| crate::err_format!("Module is too short to hold a header"))?;
        let header = Header {
            magic: words[0],
            version: words[1],
            generator: words[2],
            bound: words[3],
            schema: words[4],
        };

        if header.magic != spirv::MAGIC_NUMBER {
            bail_format!("Bad magic number {:#010x}", header.magic);
        }
        if header.version != SUPPORTED_VERSION {
            bail_format!(
                "Unsupported version {}.{}",
                (header.version >> 16) & 0xff,
                (header.version >> 8) & 0xff
            );
        }
        if header.bound == 0 {
            bail_format!("Identifier bound must be non-zero");
        }
        if header.schema != 0 {
            bail_format!("Unsupported schema {}", header.schema);
        }
        Ok(header)
    }

    fn words(&self) -> [Word; HEADER_WORDS] {
        [self.magic, self.version, self.generator, self.bound, self.schema]
    }

    fn serialize(&self, out: &mut OutputWordStream) {
        out.write_all(&self.words());
    }
}

/// Logical-layout sections, in the order they must appear in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Capabilities,
    Extensions,
    ExtInstImports,
    MemoryModel,
    EntryPoints,
    ExecutionModes,
    DebugSource,
    DebugNames,
    ModuleProcessed,
    Annotations,
    TypesGlobalValues,
}

impl Section {
    pub const ALL: [Section; 11] = [
        Section::Capabilities,
        Section::Extensions,
        Section::ExtInstImports,
        Section::MemoryModel,
        Section::EntryPoints,
        Section::ExecutionModes,
        Section::DebugSource,
        Section::DebugNames,
        Section::ModuleProcessed,
        Section::Annotations,
        Section::TypesGlobalValues,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub label: Instruction,
    /// Body instructions; the last one is the block's terminator.
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn id(&self) -> Word {
        self.label.result_id.unwrap_or_default()
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|inst| inst.is_terminator())
    }

    fn check_structure(&self) -> Result<()> {
        match self.instructions.iter().position(Instruction::is_terminator) {
            Some(pos) if pos + 1 == self.instructions.len() => Ok(()),
            Some(_) => bail_format!("Block %{} has instructions after its terminator", self.id()),
            None => bail_format!("Block %{} has no terminator", self.id()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub def: Instruction,
    pub parameters: Vec<Instruction>,
    pub blocks: Vec<Block>,
    pub end: Instruction,
}

impl Function {
    pub fn id(&self) -> Word {
        self.def.result_id.unwrap_or_default()
    }

    /// Declarations (imported functions) have no body.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        std::iter::once(&self.def)
            .chain(self.parameters.iter())
            .chain(
                self.blocks
                    .iter()
                    .flat_map(|block| std::iter::once(&block.label).chain(block.instructions.iter())),
            )
            .chain(std::iter::once(&self.end))
    }

    /// Ids of every function this one calls, in call order.
    pub fn callees(&self) -> impl Iterator<Item = Word> + '_ {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter())
            .filter(|inst| inst.opcode == Op::FunctionCall)
            .filter_map(|inst| inst.operands.first().and_then(Operand::as_id))
    }
}

/// Where an identifier is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    Global { section: Section, index: usize },
    Function { function: usize },
    Parameter { function: usize, index: usize },
    Label { function: usize, block: usize },
    Body { function: usize, block: usize, index: usize },
}

/// Identifier to definition-site table.
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    defs: HashMap<Word, DefSite>,
}

impl IdTable {
    pub fn get(&self, id: Word) -> Option<DefSite> {
        self.defs.get(&id).copied()
    }

    pub fn contains(&self, id: Word) -> bool {
        self.defs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Per-instruction rewriting over a whole module.
///
/// Returning `None` deletes the instruction. Structural instructions
/// (`OpFunction`, `OpFunctionEnd`, `OpLabel`) may be rewritten but not deleted.
pub trait Transformer {
    fn transform(&mut self, inst: Instruction) -> Option<Instruction>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub header: Header,
    pub capabilities: Vec<Instruction>,
    pub extensions: Vec<Instruction>,
    pub ext_inst_imports: Vec<Instruction>,
    pub memory_model: Vec<Instruction>,
    pub entry_points: Vec<Instruction>,
    pub execution_modes: Vec<Instruction>,
    pub debug_source: Vec<Instruction>,
    pub debug_names: Vec<Instruction>,
    pub module_processed: Vec<Instruction>,
    pub annotations: Vec<Instruction>,
    pub types_global_values: Vec<Instruction>,
    pub functions: Vec<Function>,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    /// An empty module. Identifier 0 is never valid, so the bound starts at 1.
    pub fn new() -> Self {
        Module {
            header: Header::new(1),
            capabilities: Vec::new(),
            extensions: Vec::new(),
            ext_inst_imports: Vec::new(),
            memory_model: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            debug_source: Vec::new(),
            debug_names: Vec::new(),
            module_processed: Vec::new(),
            annotations: Vec::new(),
            types_global_values: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn bound(&self) -> Word {
        self.header.bound
    }

    /// Hand out the next unused identifier and raise the bound past it.
    pub(crate) fn allocate_id(&mut self) -> Result<Word> {
        let id = self.header.bound;
        let Some(bound) = id.checked_add(1) else {
            bail_id!("Identifier space is exhausted (bound {})", id);
        };
        self.header.bound = bound;
        Ok(id)
    }

    pub fn section(&self, section: Section) -> &[Instruction] {
        match section {
            Section::Capabilities => &self.capabilities,
            Section::Extensions => &self.extensions,
            Section::ExtInstImports => &self.ext_inst_imports,
            Section::MemoryModel => &self.memory_model,
            Section::EntryPoints => &self.entry_points,
            Section::ExecutionModes => &self.execution_modes,
            Section::DebugSource => &self.debug_source,
            Section::DebugNames => &self.debug_names,
            Section::ModuleProcessed => &self.module_processed,
            Section::Annotations => &self.annotations,
            Section::TypesGlobalValues => &self.types_global_values,
        }
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Vec<Instruction> {
        match section {
            Section::Capabilities => &mut self.capabilities,
            Section::Extensions => &mut self.extensions,
            Section::ExtInstImports => &mut self.ext_inst_imports,
            Section::MemoryModel => &mut self.memory_model,
            Section::EntryPoints => &mut self.entry_points,
            Section::ExecutionModes => &mut self.execution_modes,
            Section::DebugSource => &mut self.debug_source,
            Section::DebugNames => &mut self.debug_names,
            Section::ModuleProcessed => &mut self.module_processed,
            Section::Annotations => &mut self.annotations,
            Section::TypesGlobalValues => &mut self.types_global_values,
        }
    }

    /// Parse a complete module. The stream is consumed.
    pub fn parse(mut stream: InputWordStream) -> Result<Module> {
        let header = Header::parse(&mut stream)?;
        let mut words = Vec::with_capacity(HEADER_WORDS + stream.remaining());
        words.extend_from_slice(&header.words());
        words.extend_from_slice(stream.read_n(stream.remaining())?);

        let mut layout = LayoutBuilder::new(header);
        decode::decode_instructions(&words, |inst| layout.accept(inst))?;
        let module = layout.finish()?;

        module.validate_ids()?;
        debug!(
            "Parsed module: bound {}, {} global instruction(s), {} function(s)",
            module.bound(),
            Section::ALL.iter().map(|s| module.section(*s).len()).sum::<usize>(),
            module.functions.len()
        );
        Ok(module)
    }

    /// Parse a module from raw words.
    pub fn from_words(words: Vec<Word>) -> Result<Module> {
        Self::parse(InputWordStream::new(words))
    }

    pub fn serialize(&self, out: &mut OutputWordStream) -> Result<()> {
        self.header.serialize(out);
        for inst in self.instructions() {
            encode_instruction(inst, out)?;
        }
        Ok(())
    }

    pub fn to_words(&self) -> Result<Vec<Word>> {
        let mut out = OutputWordStream::new();
        self.serialize(&mut out)?;
        Ok(out.into_words())
    }

    /// Every instruction in logical-layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        Section::ALL
            .into_iter()
            .flat_map(move |section| self.section(section).iter())
            .chain(self.functions.iter().flat_map(|f| f.instructions()))
    }

    pub fn count(&self, op: Op) -> usize {
        self.instructions().filter(|inst| inst.opcode == op).count()
    }

    /// Debug name attached to `id` with `OpName`, if any.
    pub fn name_of(&self, id: Word) -> Option<&str> {
        self.debug_names
            .iter()
            .filter(|inst| inst.opcode == Op::Name)
            .find(|inst| inst.operands.first().and_then(Operand::as_id) == Some(id))
            .and_then(|inst| inst.operands.get(1))
            .and_then(Operand::as_str)
    }

    /// Id of the first `OpName`-named function called `name`.
    pub fn function_named(&self, name: &str) -> Option<Word> {
        self.functions
            .iter()
            .map(Function::id)
            .find(|id| self.name_of(*id) == Some(name))
    }

    /// `(id, name)` of every function that has a debug name.
    pub fn function_names(&self) -> impl Iterator<Item = (Word, &str)> {
        self.functions
            .iter()
            .filter_map(move |f| self.name_of(f.id()).map(|name| (f.id(), name)))
    }

    pub fn find_function(&self, id: Word) -> Option<&Function> {
        self.functions.iter().find(|f| f.id() == id)
    }

    /// Module-scope definition of `id` (types, constants, globals, imports).
    pub fn global_def(&self, id: Word) -> Option<&Instruction> {
        self.types_global_values
            .iter()
            .chain(self.ext_inst_imports.iter())
            .find(|inst| inst.result_id == Some(id))
    }

    /// Check identifier integrity: every result id is non-zero, below the
    /// bound and unique, and every referenced id has a definition.
    pub fn validate_ids(&self) -> Result<IdTable> {
        let mut table = IdTable::default();
        let bound = self.bound();

        for (site, inst) in self.sites() {
            let Some(id) = inst.result_id else { continue };
            if id == 0 || id >= bound {
                bail_id!("Result id %{} of Op{:?} is outside the bound {}", id, inst.opcode, bound);
            }
            if table.defs.insert(id, site).is_some() {
                bail_id!("Id %{} is defined more than once", id);
            }
        }

        for inst in self.instructions() {
            for id in inst.referenced_ids() {
                if !table.contains(id) {
                    bail_id!("Op{:?} references undefined id %{}", inst.opcode, id);
                }
            }
        }

        Ok(table)
    }

    fn sites(&self) -> Vec<(DefSite, &Instruction)> {
        let mut sites = Vec::new();
        for section in Section::ALL {
            for (index, inst) in self.section(section).iter().enumerate() {
                sites.push((DefSite::Global { section, index }, inst));
            }
        }
        for (function, func) in self.functions.iter().enumerate() {
            sites.push((DefSite::Function { function }, &func.def));
            for (index, param) in func.parameters.iter().enumerate() {
                sites.push((DefSite::Parameter { function, index }, param));
            }
            for (block, b) in func.blocks.iter().enumerate() {
                sites.push((DefSite::Label { function, block }, &b.label));
                for (index, inst) in b.instructions.iter().enumerate() {
                    sites.push((DefSite::Body { function, block, index }, inst));
                }
            }
        }
        sites
    }

    /// Run `transformer` over every instruction, then re-check block
    /// structure.
    pub fn transform<T: Transformer + ?Sized>(&mut self, transformer: &mut T) -> Result<()> {
        for section in Section::ALL {
            let insts = std::mem::take(self.section_mut(section));
            *self.section_mut(section) = insts
                .into_iter()
                .filter_map(|inst| transformer.transform(inst))
                .collect();
        }

        for func in &mut self.functions {
            func.def = transform_structural(transformer, func.def.clone())?;
            let params = std::mem::take(&mut func.parameters);
            func.parameters = params
                .into_iter()
                .filter_map(|inst| transformer.transform(inst))
                .collect();
            for block in &mut func.blocks {
                block.label = transform_structural(transformer, block.label.clone())?;
                let insts = std::mem::take(&mut block.instructions);
                block.instructions = insts
                    .into_iter()
                    .filter_map(|inst| transformer.transform(inst))
                    .collect();
                block.check_structure()?;
            }
            func.end = transform_structural(transformer, func.end.clone())?;
        }
        Ok(())
    }
}

fn transform_structural<T: Transformer + ?Sized>(
    transformer: &mut T,
    inst: Instruction,
) -> Result<Instruction> {
    let opcode = inst.opcode;
    match transformer.transform(inst) {
        Some(inst) if inst.opcode == opcode => Ok(inst),
        Some(inst) => bail_format!("Op{:?} cannot be replaced by Op{:?}", opcode, inst.opcode),
        None => bail_format!("Op{:?} cannot be deleted", opcode),
    }
}

/// Places decoded instructions into their logical-layout sections and
/// assembles function bodies.
struct LayoutBuilder {
    module: Module,
    current: Section,
    pending: Option<PendingFunction>,
}

impl LayoutBuilder {
    fn new(header: Header) -> Self {
        let mut module = Module::new();
        module.header = header;
        LayoutBuilder {
            module,
            current: Section::Capabilities,
            pending: None,
        }
    }

    fn accept(&mut self, inst: Instruction) -> Result<()> {
        trace!("{}", inst);

        if let Some(function) = self.pending.as_mut() {
            if function.accept(inst)? {
                if let Some(done) = self.pending.take() {
                    self.module.functions.push(done.finish()?);
                }
            }
            return Ok(());
        }

        if inst.opcode == Op::Function {
            self.pending = Some(PendingFunction::new(inst));
            return Ok(());
        }

        let Some(section) = decode::global_section(inst.opcode) else {
            bail_format!("Op{:?} is not valid outside a function", inst.opcode);
        };
        if section < self.current {
            bail_format!(
                "Op{:?} belongs to section {:?} but appears after section {:?}",
                inst.opcode,
                section,
                self.current
            );
        }
        if section == Section::MemoryModel && !self.module.memory_model.is_empty() {
            bail_format!("Module declares more than one memory model");
        }
        self.current = section;
        self.module.section_mut(section).push(inst);
        Ok(())
    }

    fn finish(self) -> Result<Module> {
        if let Some(function) = self.pending {
            bail_format!("Function %{} is missing OpFunctionEnd", function.def.result_id.unwrap_or_default());
        }
        Ok(self.module)
    }
}

/// Function being assembled while its instructions are parsed.
struct PendingFunction {
    def: Instruction,
    parameters: Vec<Instruction>,
    blocks: Vec<Block>,
    current: Option<Block>,
    end: Option<Instruction>,
}

impl PendingFunction {
    fn new(def: Instruction) -> Self {
        PendingFunction {
            def,
            parameters: Vec::new(),
            blocks: Vec::new(),
            current: None,
            end: None,
        }
    }

    /// Returns true once `OpFunctionEnd` has been seen.
    fn accept(&mut self, inst: Instruction) -> Result<bool> {
        let function = self.def.result_id.unwrap_or_default();
        match inst.opcode {
            Op::Function => bail_format!("Function %{} is missing OpFunctionEnd", function),
            Op::FunctionParameter => {
                if !self.blocks.is_empty() || self.current.is_some() {
                    bail_format!("OpFunctionParameter after the first block of function %{}", function);
                }
                self.parameters.push(inst);
            }
            Op::Label => {
                if let Some(block) = &self.current {
                    bail_format!("Block %{} has no terminator", block.id());
                }
                self.current = Some(Block {
                    label: inst,
                    instructions: Vec::new(),
                });
            }
            Op::FunctionEnd => {
                if let Some(block) = &self.current {
                    bail_format!("Block %{} has no terminator", block.id());
                }
                self.end = Some(inst);
                return Ok(true);
            }
            _ => {
                let Some(block) = self.current.as_mut() else {
                    bail_format!("Op{:?} appears outside a block in function %{}", inst.opcode, function);
                };
                let terminates = inst.is_terminator();
                block.instructions.push(inst);
                if terminates {
                    if let Some(block) = self.current.take() {
                        self.blocks.push(block);
                    }
                }
            }
        }
        Ok(false)
    }

    fn finish(self) -> Result<Function> {
        let Some(end) = self.end else {
            bail_format!("Function %{} is missing OpFunctionEnd", self.def.result_id.unwrap_or_default());
        };
        Ok(Function {
            def: self.def,
            parameters: self.parameters,
            blocks: self.blocks,
            end,
        })
    }
}

fn encode_instruction(inst: &Instruction, out: &mut OutputWordStream) -> Result<()> {
    let word_count = inst.word_count();
    if word_count > u16::MAX as usize {
        bail_format!("Op{:?} needs {} words, more than an instruction can hold", inst.opcode, word_count);
    }

    out.write(((word_count as Word) << 16) | inst.opcode as Word);
    if let Some(ty) = inst.result_type {
        out.write(ty);
    }
    if let Some(id) = inst.result_id {
        out.write(id);
    }
    let mut words = Vec::with_capacity(word_count);
    for operand in &inst.operands {
        operand.encode(&mut words);
    }
    out.write_all(&words);
    Ok(())
}
