//! Builtin translation pass.
//!
//! Calls to front-end builtins are rewritten into constructs the target
//! environment provides: invocation coordinates become loads from the
//! `GlobalInvocationId` input, math and conversion intrinsics become
//! GLSL.std.450 or core instructions.
//!
//! Every call-site is classified and checked before the module is touched,
//! so a failed translation leaves the module as it was.

use crate::builder::{Builder, GlobalRole, TypeDesc};
use crate::builtin_registry::{
    BuiltinDescriptor, BuiltinImpl, BuiltinRegistry, Callee, CustomImpl, GLSL_STD_450,
};
use crate::error::{Result, TranslateError};
use crate::kernel_signature::{KernelSignatures, COORDS_NAMES};
use crate::module::{DefSite, Function, Instruction, Module, Operand, Transformer};
use crate::{bail_format, bail_id};
use log::debug;
use spirv::{BuiltIn, Decoration, GLOp, Op, StorageClass, Word};
use std::collections::{HashMap, HashSet, VecDeque};

/// Translate every builtin call in the builder's module, then serialize it.
pub fn translate_builtins(builder: &mut Builder<'_>, signatures: &KernelSignatures) -> Result<Vec<Word>> {
    let registry = BuiltinRegistry::new();
    let plan = Plan::build(builder.module(), &registry, signatures)?;
    debug!(
        "Planned {} builtin rewrite(s), {} entry point(s) read coordinates",
        plan.sites.len(),
        plan.coordinate_entries.len()
    );

    let stats = plan.apply(builder)?;
    debug!(
        "Rewrote {} coordinate access(es) and {} intrinsic call(s), removed {} declaration(s)",
        stats.coordinates, stats.intrinsics, stats.removed_functions
    );

    builder.module().validate_ids()?;
    builder.module().to_words()
}

/// Parse `words`, translate the module and serialize it again.
pub fn translate_words(words: Vec<Word>, signatures: &KernelSignatures) -> Result<Vec<Word>> {
    let mut module = Module::from_words(words)?;
    let mut builder = Builder::new(&mut module);
    translate_builtins(&mut builder, signatures)
}

/// Upper bounds on the ids a single rewrite, and the declarations all
/// rewrites share, can mint.
const IDS_PER_REWRITE: u64 = 4;
const SHARED_IDS: u64 = 8;

/// Function id to the ids of the functions it calls.
struct CallGraph {
    callees: HashMap<Word, Vec<Word>>,
}

impl CallGraph {
    fn new(module: &Module) -> Self {
        let callees = module
            .functions
            .iter()
            .map(|f| (f.id(), f.callees().collect()))
            .collect();
        CallGraph { callees }
    }

    /// Every function reachable from `roots`, roots included.
    fn reachable_from(&self, roots: impl IntoIterator<Item = Word>) -> HashSet<Word> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<Word> = roots.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(callees) = self.callees.get(&id) {
                queue.extend(callees.iter().copied().filter(|c| !seen.contains(c)));
            }
        }
        seen
    }
}

#[derive(Debug)]
enum Rewrite<'r> {
    Coordinate {
        component: usize,
        /// Debug name for the loaded value, when the function belongs to a
        /// single kernel.
        name: Option<String>,
    },
    Intrinsic {
        builtin: &'r BuiltinDescriptor,
        /// Component count of the call's result type, if it is a vector.
        width: Option<u32>,
    },
}

#[derive(Debug)]
struct CallSite<'r> {
    function: usize,
    block: usize,
    index: usize,
    callee: Word,
    result_type: Word,
    result_id: Word,
    args: Vec<Word>,
    rewrite: Rewrite<'r>,
}

struct Plan<'r> {
    /// In module order.
    sites: Vec<CallSite<'r>>,
    /// Entry point functions whose call tree reads a coordinate.
    coordinate_entries: Vec<Word>,
    /// Body-less declarations of builtins, removed once nothing calls them.
    builtin_declarations: HashSet<Word>,
    /// `GlobalInvocationId` input already declared by the module.
    existing_input: Option<ExistingInput>,
}

#[derive(Debug, Default)]
struct Stats {
    coordinates: usize,
    intrinsics: usize,
    removed_functions: usize,
}

impl<'r> Plan<'r> {
    fn build(
        module: &Module,
        registry: &'r BuiltinRegistry,
        signatures: &KernelSignatures,
    ) -> Result<Self> {
        let ids = module.validate_ids()?;
        let graph = CallGraph::new(module);

        // Kernels reaching each function, in signature order.
        let mut kernels_of: HashMap<Word, Vec<&str>> = HashMap::new();
        for sig in signatures.iter() {
            let roots = module
                .function_names()
                .filter(|(_, name)| {
                    signatures
                        .for_function_name(name)
                        .is_some_and(|owner| owner.name == sig.name)
                })
                .map(|(id, _)| id);
            for function in graph.reachable_from(roots) {
                kernels_of.entry(function).or_default().push(sig.name.as_str());
            }
        }

        let mut sites = Vec::new();
        let mut reads_coordinates = HashSet::new();

        for (fi, function) in module.functions.iter().enumerate() {
            let kernels = kernels_of.get(&function.id()).map(Vec::as_slice).unwrap_or(&[]);

            for (bi, block) in function.blocks.iter().enumerate() {
                for (ii, inst) in block.instructions.iter().enumerate() {
                    if inst.opcode != Op::FunctionCall {
                        continue;
                    }
                    let Some(callee) = inst.operands.first().and_then(Operand::as_id) else {
                        bail_format!("OpFunctionCall without a callee in function %{}", function.id());
                    };
                    if !matches!(ids.get(callee), Some(DefSite::Function { .. })) {
                        bail_format!(
                            "OpFunctionCall in function %{} calls %{}, which is not a function",
                            function.id(),
                            callee
                        );
                    }
                    let Some(name) = module.name_of(callee) else {
                        continue;
                    };

                    let rewrite = match registry.classify(name, signatures) {
                        Callee::Ordinary => continue,
                        Callee::Unrecognized => {
                            return Err(TranslateError::UnknownBuiltin(name.to_string()));
                        }
                        Callee::Coordinate(component) => {
                            check_coordinate(module, function, component, kernels, signatures)?;
                            reads_coordinates.insert(function.id());
                            let name = match kernels {
                                [kernel] => signatures
                                    .get(kernel)
                                    .map(|sig| sig.temp_name(&format!("coords_{}", COORDS_NAMES[component]))),
                                _ => None,
                            };
                            Rewrite::Coordinate { component, name }
                        }
                        Callee::Intrinsic(builtin) => {
                            let arity = inst.operands.len() - 1;
                            if arity != builtin.arity {
                                bail_format!(
                                    "Call to {} passes {} argument(s), expected {}",
                                    builtin.name,
                                    arity,
                                    builtin.arity
                                );
                            }
                            let width = inst.result_type.and_then(|ty| vector_width(module, ty));
                            if matches!(builtin.implementation, BuiltinImpl::Custom(CustomImpl::ClampVectorScalar(_)))
                                && width.is_none()
                            {
                                bail_format!("Call to {} does not return a vector", builtin.name);
                            }
                            Rewrite::Intrinsic { builtin, width }
                        }
                    };

                    let (Some(result_type), Some(result_id)) = (inst.result_type, inst.result_id) else {
                        bail_format!("OpFunctionCall to {} has no result", name);
                    };
                    let Some(args) = inst.operands[1..]
                        .iter()
                        .map(Operand::as_id)
                        .collect::<Option<Vec<_>>>()
                    else {
                        bail_format!("OpFunctionCall to {} has a non-id argument", name);
                    };

                    debug!("%{} = {}(...) in function %{}: {:?}", result_id, name, function.id(), rewrite);
                    sites.push(CallSite {
                        function: fi,
                        block: bi,
                        index: ii,
                        callee,
                        result_type,
                        result_id,
                        args,
                        rewrite,
                    });
                }
            }
        }

        if !sites.is_empty() {
            let needed = sites.len() as u64 * IDS_PER_REWRITE + SHARED_IDS;
            if u64::from(module.bound()) + needed > u64::from(Word::MAX) {
                bail_id!(
                    "Rewriting {} call(s) needs up to {} new ids, but the bound is already {}",
                    sites.len(),
                    needed,
                    module.bound()
                );
            }
        }

        let existing_input = if reads_coordinates.is_empty() {
            None
        } else {
            ExistingInput::find(module)?
        };

        let coordinate_entries = module
            .entry_points
            .iter()
            .filter_map(|entry| entry.operands.get(1).and_then(Operand::as_id))
            .filter(|entry| {
                graph
                    .reachable_from([*entry])
                    .iter()
                    .any(|f| reads_coordinates.contains(f))
            })
            .collect();

        let builtin_declarations = module
            .functions
            .iter()
            .filter(|function| function.is_declaration())
            .filter(|function| {
                module.name_of(function.id()).is_some_and(|name| {
                    matches!(
                        registry.classify(name, signatures),
                        Callee::Coordinate(_) | Callee::Intrinsic(_)
                    )
                })
            })
            .map(Function::id)
            .collect();

        Ok(Plan {
            sites,
            coordinate_entries,
            builtin_declarations,
            existing_input,
        })
    }

    fn apply(self, builder: &mut Builder<'_>) -> Result<Stats> {
        let mut stats = Stats::default();
        let mut coordinates: Option<CoordinateInput> = None;
        let mut glsl: Option<Word> = None;
        let mut replacements = HashMap::new();
        let mut dead_candidates = self.builtin_declarations.clone();

        // Walk backwards so the recorded positions of earlier calls in the
        // same block stay valid.
        for site in self.sites.iter().rev() {
            builder.select_block(site.function, site.block)?;
            builder.set_position(site.index)?;
            builder.remove_current()?;

            let value = match &site.rewrite {
                Rewrite::Coordinate { component, name } => {
                    let input = match coordinates {
                        Some(input) => input,
                        None => {
                            let input = CoordinateInput::declare(builder, self.existing_input)?;
                            coordinates = Some(input);
                            input
                        }
                    };
                    stats.coordinates += 1;
                    input.read(builder, *component, site.result_type, name.as_deref())?
                }
                Rewrite::Intrinsic { builtin, width } => {
                    stats.intrinsics += 1;
                    lower_intrinsic(builder, site, builtin, *width, &mut glsl)?
                }
            };

            replacements.insert(site.result_id, value);
            dead_candidates.insert(site.callee);
        }

        if let Some(input) = coordinates {
            for entry in &self.coordinate_entries {
                builder.add_to_interface(*entry, input.variable);
            }
        }

        builder.module_mut().transform(&mut ReplaceUses {
            replacements: &replacements,
        })?;
        stats.removed_functions = remove_dead_functions(builder.module_mut(), &dead_candidates);
        Ok(stats)
    }
}

fn check_coordinate(
    module: &Module,
    function: &Function,
    component: usize,
    kernels: &[&str],
    signatures: &KernelSignatures,
) -> Result<()> {
    let requested = component + 1;
    if kernels.is_empty() {
        let kernel = module
            .name_of(function.id())
            .map(str::to_string)
            .unwrap_or_else(|| format!("%{}", function.id()));
        return Err(TranslateError::SignatureMismatch {
            kernel,
            requested,
            declared: 0,
        });
    }
    for kernel in kernels {
        let declared = signatures.get(kernel).map_or(0, |sig| sig.coords.count());
        if declared < requested {
            return Err(TranslateError::SignatureMismatch {
                kernel: kernel.to_string(),
                requested,
                declared,
            });
        }
    }
    Ok(())
}

fn vector_width(module: &Module, ty: Word) -> Option<u32> {
    match module.global_def(ty).and_then(TypeDesc::from_declaration)? {
        TypeDesc::Vector { count, .. } => Some(count),
        _ => None,
    }
}

/// A `GlobalInvocationId` input variable the module declared itself.
#[derive(Debug, Clone, Copy)]
struct ExistingInput {
    variable: Word,
    /// 32-bit integer type of each of its three components.
    component: Word,
}

impl ExistingInput {
    /// The first `Input` variable decorated `BuiltIn GlobalInvocationId`,
    /// checked to be a 3-component vector of 32-bit integers.
    fn find(module: &Module) -> Result<Option<Self>> {
        let variable = module
            .annotations
            .iter()
            .filter(|inst| inst.opcode == Op::Decorate)
            .filter(|inst| {
                inst.operands.get(1).and_then(Operand::as_literal) == Some(Decoration::BuiltIn as Word)
                    && inst.operands.get(2).and_then(Operand::as_literal)
                        == Some(BuiltIn::GlobalInvocationId as Word)
            })
            .filter_map(|inst| inst.operands.first().and_then(Operand::as_id))
            .find(|target| {
                module.global_def(*target).is_some_and(|def| {
                    def.opcode == Op::Variable
                        && def.operands.first().and_then(Operand::as_literal) == Some(StorageClass::Input as Word)
                })
            });
        let Some(variable) = variable else {
            return Ok(None);
        };

        let desc = |id: Word| module.global_def(id).and_then(TypeDesc::from_declaration);
        let pointee = match module.global_def(variable).and_then(|def| def.result_type).and_then(desc) {
            Some(TypeDesc::Pointer { pointee, .. }) => desc(pointee),
            _ => None,
        };
        if let Some(TypeDesc::Vector { component, count: 3 }) = pointee {
            if let Some(TypeDesc::Int { width: 32, .. }) = desc(component) {
                return Ok(Some(ExistingInput { variable, component }));
            }
        }
        bail_format!(
            "GlobalInvocationId variable %{} is not a 3-component vector of 32-bit integers",
            variable
        );
    }
}

/// The shared invocation-id input and the types used to read it.
#[derive(Debug, Clone, Copy)]
struct CoordinateInput {
    /// Type a single component is loaded as.
    component: Word,
    /// `Input` pointer to one component.
    component_pointer: Word,
    variable: Word,
}

impl CoordinateInput {
    /// Reuse `existing` when the module has one, otherwise declare a `uint3`
    /// input.
    fn declare(builder: &mut Builder<'_>, existing: Option<ExistingInput>) -> Result<Self> {
        let (component, variable) = match existing {
            Some(input) => (input.component, input.variable),
            None => {
                let uint = builder.type_id(&TypeDesc::uint())?;
                let uint3 = builder.type_id(&TypeDesc::Vector {
                    component: uint,
                    count: 3,
                })?;
                let pointer = builder.type_id(&TypeDesc::Pointer {
                    storage: StorageClass::Input,
                    pointee: uint3,
                })?;
                let variable = builder.global_variable(
                    pointer,
                    StorageClass::Input,
                    GlobalRole::BuiltIn(BuiltIn::GlobalInvocationId),
                )?;
                (uint, variable)
            }
        };
        let component_pointer = builder.type_id(&TypeDesc::Pointer {
            storage: StorageClass::Input,
            pointee: component,
        })?;
        Ok(CoordinateInput {
            component,
            component_pointer,
            variable,
        })
    }

    fn read(
        &self,
        builder: &mut Builder<'_>,
        component: usize,
        result_type: Word,
        name: Option<&str>,
    ) -> Result<Word> {
        let index = builder.constant_u32(component as u32)?;
        let element = builder.access_chain(self.component_pointer, self.variable, &[index])?;
        let value = builder.load(self.component, element)?;
        if let Some(name) = name {
            builder.name(value, name);
        }
        if result_type == self.component {
            Ok(value)
        } else {
            builder.unary(Op::Bitcast, result_type, value)
        }
    }
}

fn glsl_import(builder: &mut Builder<'_>, glsl: &mut Option<Word>) -> Result<Word> {
    match glsl {
        Some(set) => Ok(*set),
        None => {
            let set = builder.ext_inst_import(GLSL_STD_450)?;
            *glsl = Some(set);
            Ok(set)
        }
    }
}

fn lower_intrinsic(
    builder: &mut Builder<'_>,
    site: &CallSite<'_>,
    builtin: &BuiltinDescriptor,
    width: Option<u32>,
    glsl: &mut Option<Word>,
) -> Result<Word> {
    let ty = site.result_type;
    let args = site.args.as_slice();

    match builtin.implementation {
        BuiltinImpl::SpirvOp(op) => match args {
            [value] => builder.unary(op, ty, *value),
            [lhs, rhs] => builder.binary(op, ty, *lhs, *rhs),
            _ => bail_format!("Op{:?} cannot lower {} with {} argument(s)", op, builtin.name, args.len()),
        },
        BuiltinImpl::GlslExt(op) => {
            let set = glsl_import(builder, glsl)?;
            builder.ext_inst(ty, set, op as u32, args)
        }
        BuiltinImpl::Custom(CustomImpl::ClampVectorScalar(op)) => {
            let (Some(width), [value, low, high]) = (width, args) else {
                bail_format!("Cannot lower {} as a vector clamp", builtin.name);
            };
            let low = builder.composite_construct(ty, &vec![*low; width as usize])?;
            let high = builder.composite_construct(ty, &vec![*high; width as usize])?;
            let set = glsl_import(builder, glsl)?;
            builder.ext_inst(ty, set, op as u32, &[*value, low, high])
        }
        BuiltinImpl::Custom(CustomImpl::UnpackColor8888) => {
            let [color] = args else {
                bail_format!("{} takes one argument", builtin.name);
            };
            let uint = builder.type_id(&TypeDesc::uint())?;
            let packed = builder.unary(Op::Bitcast, uint, *color)?;
            let set = glsl_import(builder, glsl)?;
            builder.ext_inst(ty, set, GLOp::UnpackUnorm4x8 as u32, &[packed])
        }
        BuiltinImpl::Custom(CustomImpl::PackColorTo8888) => {
            let [color] = args else {
                bail_format!("{} takes one argument", builtin.name);
            };
            let uint = builder.type_id(&TypeDesc::uint())?;
            let set = glsl_import(builder, glsl)?;
            let packed = builder.ext_inst(uint, set, GLOp::PackUnorm4x8 as u32, &[*color])?;
            if ty == uint {
                Ok(packed)
            } else {
                builder.unary(Op::Bitcast, ty, packed)
            }
        }
    }
}

/// Id an `OpName`/`OpDecorate` style instruction is about.
fn annotation_target(inst: &Instruction) -> Option<Word> {
    match inst.opcode {
        Op::Name | Op::MemberName | Op::Decorate | Op::MemberDecorate => {
            inst.operands.first().and_then(Operand::as_id)
        }
        _ => None,
    }
}

/// Redirects uses of removed call results to their replacement values.
/// Names and decorations of the removed results are dropped.
struct ReplaceUses<'a> {
    replacements: &'a HashMap<Word, Word>,
}

impl Transformer for ReplaceUses<'_> {
    fn transform(&mut self, mut inst: Instruction) -> Option<Instruction> {
        if annotation_target(&inst).is_some_and(|target| self.replacements.contains_key(&target)) {
            return None;
        }
        inst.map_ids(|id| self.replacements.get(&id).copied().unwrap_or(id));
        Some(inst)
    }
}

/// Remove functions in `candidates` that nothing references any more, along
/// with the names and decorations of everything they defined.
fn remove_dead_functions(module: &mut Module, candidates: &HashSet<Word>) -> usize {
    let referenced: HashSet<Word> = module
        .instructions()
        .filter(|inst| annotation_target(inst).is_none())
        .flat_map(|inst| inst.referenced_ids())
        .collect();

    let mut dead_ids = HashSet::new();
    let mut removed = 0;
    module.functions.retain(|function| {
        if !candidates.contains(&function.id()) || referenced.contains(&function.id()) {
            return true;
        }
        debug!("Removing unused builtin function %{}", function.id());
        dead_ids.extend(function.instructions().filter_map(|inst| inst.result_id));
        removed += 1;
        false
    });

    if !dead_ids.is_empty() {
        let keep = |inst: &Instruction| !annotation_target(inst).is_some_and(|target| dead_ids.contains(&target));
        module.debug_names.retain(keep);
        module.annotations.retain(keep);
    }
    removed
}
