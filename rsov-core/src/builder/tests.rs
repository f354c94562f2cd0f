use super::*;
use crate::error::TranslateError;
use crate::test_fixtures::{init_logger, Fixture};

#[test]
fn test_types_are_interned() {
    init_logger();
    let mut module = Module::new();
    let mut builder = Builder::new(&mut module);

    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    assert_eq!(builder.type_id(&TypeDesc::uint()).unwrap(), uint);

    let uint3 = TypeDesc::Vector {
        component: uint,
        count: 3,
    };
    let vector = builder.type_id(&uint3).unwrap();
    assert_eq!(builder.type_id(&uint3).unwrap(), vector);
    assert_ne!(vector, uint);

    assert_eq!(module.types_global_values.len(), 2);
    assert_eq!(module.bound(), 3);
}

#[test]
fn test_type_with_undefined_component_is_rejected() {
    let mut module = Module::new();
    let mut builder = Builder::new(&mut module);
    let result = builder.type_id(&TypeDesc::Vector {
        component: 42,
        count: 3,
    });
    assert!(matches!(result, Err(TranslateError::IdentifierError(_))));
    assert!(module.types_global_values.is_empty());
}

#[test]
fn test_seeded_from_parsed_module() {
    let mut f = Fixture::new();
    let ty = f.ty;
    let seven = f.b.constant_bit32(ty.uint, 7);
    let glsl = f.b.ext_inst_import("GLSL.std.450");
    let mut module = f.module();
    let bound = module.bound();

    let mut builder = Builder::new(&mut module);
    assert_eq!(builder.type_id(&TypeDesc::uint()).unwrap(), ty.uint);
    assert_eq!(builder.type_id(&TypeDesc::Float { width: 32 }).unwrap(), ty.float);
    assert_eq!(
        builder
            .type_id(&TypeDesc::Vector {
                component: ty.float,
                count: 4
            })
            .unwrap(),
        ty.float4
    );
    assert_eq!(builder.constant_u32(7).unwrap(), seven);
    assert_eq!(builder.ext_inst_import("GLSL.std.450").unwrap(), glsl);

    assert_eq!(module.bound(), bound);
}

#[test]
fn test_constants_are_interned() {
    let mut module = Module::new();
    let mut builder = Builder::new(&mut module);

    let zero = builder.constant_u32(0).unwrap();
    let one = builder.constant_u32(1).unwrap();
    assert_ne!(zero, one);
    assert_eq!(builder.constant_u32(0).unwrap(), zero);

    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    let uint2 = builder
        .type_id(&TypeDesc::Vector {
            component: uint,
            count: 2,
        })
        .unwrap();
    let pair = ConstantDesc::Composite {
        ty: uint2,
        parts: vec![zero, one],
    };
    let composite = builder.constant_id(&pair).unwrap();
    assert_eq!(builder.constant_id(&pair).unwrap(), composite);

    assert_eq!(module.count(Op::Constant), 2);
    assert_eq!(module.count(Op::ConstantComposite), 1);
    module.validate_ids().unwrap();
}

#[test]
fn test_global_variable_declared_once() {
    let mut module = Module::new();
    let mut builder = Builder::new(&mut module);

    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    let uint3 = builder
        .type_id(&TypeDesc::Vector {
            component: uint,
            count: 3,
        })
        .unwrap();
    let ptr = builder
        .type_id(&TypeDesc::Pointer {
            storage: StorageClass::Input,
            pointee: uint3,
        })
        .unwrap();

    let role = GlobalRole::BuiltIn(BuiltIn::GlobalInvocationId);
    let var = builder.global_variable(ptr, StorageClass::Input, role).unwrap();
    assert_eq!(builder.global_variable(ptr, StorageClass::Input, role).unwrap(), var);

    assert_eq!(module.count(Op::Variable), 1);
    assert_eq!(module.count(Op::Decorate), 1);
    assert_eq!(
        module.annotations[0].operands,
        vec![
            Operand::Id(var),
            Operand::Literal(Decoration::BuiltIn as Word),
            Operand::Literal(BuiltIn::GlobalInvocationId as Word),
        ]
    );
}

#[test]
fn test_existing_builtin_variable_is_reused() {
    let mut f = Fixture::new();
    let var = f.invocation_id();
    let mut module = f.module();

    let mut builder = Builder::new(&mut module);
    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    let uint3 = builder
        .type_id(&TypeDesc::Vector {
            component: uint,
            count: 3,
        })
        .unwrap();
    let ptr = builder
        .type_id(&TypeDesc::Pointer {
            storage: StorageClass::Input,
            pointee: uint3,
        })
        .unwrap();
    let role = GlobalRole::BuiltIn(BuiltIn::GlobalInvocationId);
    assert_eq!(builder.global_variable(ptr, StorageClass::Input, role).unwrap(), var);
    assert_eq!(module.count(Op::Variable), 1);
}

#[test]
fn test_ids_are_fresh() {
    let mut module = Module::from_words(Fixture::new().words()).unwrap();
    let bound = module.bound();
    let mut builder = Builder::new(&mut module);
    let a = builder.id().unwrap();
    let b = builder.id().unwrap();
    assert_eq!(a, bound);
    assert_eq!(b, bound + 1);
    assert_eq!(module.bound(), bound + 2);
}

#[test]
fn test_exhausted_id_space_is_an_error() {
    let f = Fixture::new();
    let uint = f.ty.uint;
    let mut module = f.module();
    module.header.bound = Word::MAX;
    let mut builder = Builder::new(&mut module);

    assert!(matches!(builder.id(), Err(TranslateError::IdentifierError(_))));
    let result = builder.type_id(&TypeDesc::Vector {
        component: uint,
        count: 2,
    });
    assert!(matches!(result, Err(TranslateError::IdentifierError(_))));
    assert_eq!(module.bound(), Word::MAX);
}

fn kernel_module() -> Module {
    let mut f = Fixture::new();
    let kernel = f.define("kernel", |b, ty| {
        let one = b.constant_bit32(ty.uint, 1);
        b.i_add(ty.uint, None, one, one).unwrap();
    });
    f.entry(kernel, "kernel");
    f.module()
}

#[test]
fn test_insert_at_position() {
    let mut module = kernel_module();
    let mut builder = Builder::new(&mut module);
    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    let two = builder.constant_u32(2).unwrap();

    builder.select_block(0, 0).unwrap();
    builder.set_position(1).unwrap();
    let product = builder.binary(Op::IMul, uint, two, two).unwrap();
    let sum = builder.binary(Op::IAdd, uint, product, two).unwrap();
    assert_eq!(
        builder.insert_point(),
        Some(InsertPoint {
            function: 0,
            block: 0,
            index: 3
        })
    );

    let block = &module.functions[0].blocks[0];
    assert_eq!(block.instructions[1].result_id, Some(product));
    assert_eq!(block.instructions[2].result_id, Some(sum));
    assert_eq!(block.terminator().map(|t| t.opcode), Some(Op::Return));
    module.validate_ids().unwrap();
}

#[test]
fn test_insert_after_terminator_is_rejected() {
    let mut module = kernel_module();
    let original = module.clone();
    let mut builder = Builder::new(&mut module);
    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    let two = builder.constant_u32(2).unwrap();

    assert!(builder.binary(Op::IAdd, uint, two, two).is_err());

    builder.select_block(0, 0).unwrap();
    let len = builder.module().functions[0].blocks[0].instructions.len();
    assert!(builder.set_position(len + 1).is_err());
    builder.set_position(len).unwrap();
    let result = builder.binary(Op::IAdd, uint, two, two);
    assert!(matches!(result, Err(TranslateError::FormatError(_))));
    assert_eq!(module.functions, original.functions);
}

#[test]
fn test_select_missing_block() {
    let mut module = kernel_module();
    let mut builder = Builder::new(&mut module);
    assert!(builder.select_block(0, 1).is_err());
    assert!(builder.select_block(5, 0).is_err());
    assert!(builder.insert_point().is_none());
}

#[test]
fn test_remove_current() {
    let mut module = kernel_module();
    let mut builder = Builder::new(&mut module);
    builder.select_block(0, 0).unwrap();
    let removed = builder.remove_current().unwrap();
    assert_eq!(removed.opcode, Op::IAdd);
    assert_eq!(module.functions[0].blocks[0].instructions.len(), 1);
}

#[test]
fn test_interface_and_names() {
    let mut module = kernel_module();
    let kernel = module.function_named("kernel").unwrap();
    let mut builder = Builder::new(&mut module);

    let uint = builder.type_id(&TypeDesc::uint()).unwrap();
    let ptr = builder
        .type_id(&TypeDesc::Pointer {
            storage: StorageClass::Input,
            pointee: uint,
        })
        .unwrap();
    let var = builder
        .global_variable(ptr, StorageClass::Input, GlobalRole::BuiltIn(BuiltIn::LocalInvocationIndex))
        .unwrap();
    builder.add_to_interface(kernel, var);
    builder.add_to_interface(kernel, var);
    builder.name(var, "index");

    let interface: Vec<&Operand> = module.entry_points[0].operands.iter().skip(3).collect();
    assert_eq!(interface, vec![&Operand::Id(var)]);
    assert_eq!(module.name_of(var), Some("index"));
    module.validate_ids().unwrap();
}
