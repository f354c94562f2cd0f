//! SPIR-V fixtures for unit tests, assembled with rspirv.

use crate::module::Module;
use rspirv::binary::Assemble;
use rspirv::dr::{self, Operand};
use spirv::{
    AddressingModel, BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, FunctionControl,
    MemoryModel, StorageClass, Word,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy)]
pub struct Types {
    pub void: Word,
    pub uint: Word,
    pub int: Word,
    pub float: Word,
    pub float3: Word,
    pub float4: Word,
    pub uchar4: Word,
    pub void_fn: Word,
}

pub struct Fixture {
    pub b: dr::Builder,
    pub ty: Types,
}

impl Fixture {
    pub fn new() -> Self {
        let mut b = dr::Builder::new();
        b.set_version(1, 0);
        b.capability(Capability::Shader);
        b.capability(Capability::Int8);
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        let void = b.type_void();
        let uint = b.type_int(32, 0);
        let int = b.type_int(32, 1);
        let float = b.type_float(32);
        let float3 = b.type_vector(float, 3);
        let float4 = b.type_vector(float, 4);
        let uchar = b.type_int(8, 0);
        let uchar4 = b.type_vector(uchar, 4);
        let void_fn = b.type_function(void, Vec::<Word>::new());

        Fixture {
            b,
            ty: Types {
                void,
                uint,
                int,
                float,
                float3,
                float4,
                uchar4,
                void_fn,
            },
        }
    }

    /// Declare a function without a body, the way front ends import
    /// builtins.
    pub fn declare(&mut self, name: &str, ret: Word, params: &[Word]) -> Word {
        let fn_ty = self.b.type_function(ret, params.to_vec());
        let id = self
            .b
            .begin_function(ret, None, FunctionControl::NONE, fn_ty)
            .unwrap();
        for param in params {
            self.b.function_parameter(*param).unwrap();
        }
        self.b.end_function().unwrap();
        self.b.name(id, name);
        id
    }

    /// Define a `void()` function with one block whose body is built by
    /// `body`; the block is closed with `OpReturn`.
    pub fn define(&mut self, name: &str, body: impl FnOnce(&mut dr::Builder, Types)) -> Word {
        let id = self
            .b
            .begin_function(self.ty.void, None, FunctionControl::NONE, self.ty.void_fn)
            .unwrap();
        self.b.begin_block(None).unwrap();
        body(&mut self.b, self.ty);
        self.b.ret().unwrap();
        self.b.end_function().unwrap();
        self.b.name(id, name);
        id
    }

    /// Make `function` a compute entry point.
    pub fn entry(&mut self, function: Word, name: &str) {
        self.b
            .entry_point(ExecutionModel::GLCompute, function, name, Vec::<Word>::new());
        self.b
            .execution_mode(function, ExecutionMode::LocalSize, vec![1u32, 1, 1]);
    }

    /// A `uint3` input variable decorated `BuiltIn GlobalInvocationId`.
    pub fn invocation_id(&mut self) -> Word {
        let uint3 = self.b.type_vector(self.ty.uint, 3);
        let ptr = self.b.type_pointer(None, StorageClass::Input, uint3);
        let var = self.b.variable(ptr, None, StorageClass::Input, None);
        self.b.decorate(
            var,
            Decoration::BuiltIn,
            vec![Operand::BuiltIn(BuiltIn::GlobalInvocationId)],
        );
        var
    }

    /// Define a kernel that calls each getter in `getters`, sums the
    /// results and doubles the sum.
    pub fn coordinate_kernel(&mut self, name: &str, getters: &[Word]) -> Word {
        let getters = getters.to_vec();
        self.define(name, |b, ty| {
            let mut sum = None;
            for getter in getters {
                let value = b.function_call(ty.uint, None, getter, Vec::<Word>::new()).unwrap();
                sum = Some(match sum {
                    Some(acc) => b.i_add(ty.uint, None, acc, value).unwrap(),
                    None => value,
                });
            }
            if let Some(acc) = sum {
                b.i_add(ty.uint, None, acc, acc).unwrap();
            }
        })
    }

    pub fn words(self) -> Vec<Word> {
        self.b.module().assemble()
    }

    pub fn module(self) -> Module {
        Module::from_words(self.words()).unwrap()
    }
}
