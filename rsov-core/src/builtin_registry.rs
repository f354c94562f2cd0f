// Builtin function registry
// The closed set of front-end builtins the translation pass lowers, and the
// classification of callee names against it.

use crate::kernel_signature::{KernelSignature, KernelSignatures};
use spirv::{GLOp, Op};
use std::collections::HashMap;

/// Name of the extended instruction set used by [`BuiltinImpl::GlslExt`].
pub const GLSL_STD_450: &str = "GLSL.std.450";

/// Coordinate builtins, indexed by component.
pub const COORD_BUILTINS: [&str; 3] = ["rsGetCoordX", "rsGetCoordY", "rsGetCoordZ"];

const COORD_FAMILY_PREFIX: &str = "rsGetCoord";

/// Implementation strategy for a builtin function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinImpl {
    /// GLSL.std.450 extended instruction over the call's arguments
    GlslExt(GLOp),

    /// Core SPIR-V instruction over the call's arguments (e.g. OpDot, OpUConvert)
    SpirvOp(Op),

    /// Multi-instruction lowering
    Custom(CustomImpl),
}

/// Lowerings that need more than one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomImpl {
    /// Vector clamp with scalar bounds. Both bounds are splatted to the
    /// vector width first.
    ClampVectorScalar(GLOp),

    /// Bitcast the packed color to `uint`, then UnpackUnorm4x8.
    UnpackColor8888,

    /// PackUnorm4x8, then bitcast to the call's result type.
    PackColorTo8888,
}

/// Builtin function descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    /// Callee name as emitted by the front end (usually mangled)
    pub name: &'static str,

    /// Number of call arguments
    pub arity: usize,

    /// Code generation implementation
    pub implementation: BuiltinImpl,
}

/// What a call-site's callee turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee<'r> {
    /// Invocation coordinate access; the payload is the component index.
    Coordinate(usize),
    Intrinsic(&'r BuiltinDescriptor),
    /// A call that stays as it is.
    Ordinary,
    /// Looks like a builtin but is not one the pass knows.
    Unrecognized,
}

/// Central registry for all lowerable builtins
pub struct BuiltinRegistry {
    builtins: HashMap<&'static str, BuiltinDescriptor>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = BuiltinRegistry {
            builtins: HashMap::new(),
        };

        registry.register_conversions();
        registry.register_math();
        registry.register_geometry();
        registry.register_color();

        registry
    }

    /// Check if a name is a registered builtin
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    /// Get builtin descriptor
    pub fn get(&self, name: &str) -> Option<&BuiltinDescriptor> {
        self.builtins.get(name)
    }

    pub fn len(&self) -> usize {
        self.builtins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty()
    }

    /// Classify a callee name.
    ///
    /// Wrapper-prefixed names are ordinary only when a known kernel owns
    /// them. Names in the coordinate family that are not one of
    /// [`COORD_BUILTINS`] are unrecognized.
    pub fn classify(&self, name: &str, signatures: &KernelSignatures) -> Callee<'_> {
        if KernelSignature::is_wrapper(name) {
            return match signatures.owner_of(name) {
                Some(_) => Callee::Ordinary,
                None => Callee::Unrecognized,
            };
        }
        if let Some(component) = COORD_BUILTINS.iter().position(|builtin| *builtin == name) {
            return Callee::Coordinate(component);
        }
        if name.starts_with(COORD_FAMILY_PREFIX) {
            return Callee::Unrecognized;
        }
        match self.get(name) {
            Some(desc) => Callee::Intrinsic(desc),
            None => Callee::Ordinary,
        }
    }

    fn register(&mut self, name: &'static str, arity: usize, implementation: BuiltinImpl) {
        self.builtins.insert(
            name,
            BuiltinDescriptor {
                name,
                arity,
                implementation,
            },
        );
    }

    fn register_conversions(&mut self) {
        for name in ["_Z14convert_float4Dv4_h", "_Z14convert_float3Dv3_h"] {
            self.register(name, 1, BuiltinImpl::SpirvOp(Op::ConvertUToF));
        }
        for name in ["_Z14convert_uchar4Dv4_f", "_Z14convert_uchar3Dv3_f", "_Z12convert_int3Dv3_f"] {
            self.register(name, 1, BuiltinImpl::SpirvOp(Op::ConvertFToU));
        }
        for name in ["_Z14convert_uchar3Dv3_i", "_Z14convert_uchar4Dv4_j", "_Z13convert_uint4Dv4_h"] {
            self.register(name, 1, BuiltinImpl::SpirvOp(Op::UConvert));
        }
    }

    fn register_math(&mut self) {
        self.register("_Z3sinf", 1, BuiltinImpl::GlslExt(GLOp::Sin));
        self.register("_Z4sqrtf", 1, BuiltinImpl::GlslExt(GLOp::Sqrt));
        self.register("_Z10native_expf", 1, BuiltinImpl::GlslExt(GLOp::Exp));
        self.register("_Z3maxii", 2, BuiltinImpl::GlslExt(GLOp::SMax));
        self.register("_Z3minii", 2, BuiltinImpl::GlslExt(GLOp::SMin));
        self.register("_Z3maxff", 2, BuiltinImpl::GlslExt(GLOp::FMax));
        self.register("_Z3minff", 2, BuiltinImpl::GlslExt(GLOp::FMin));
        self.register("_Z5clampfff", 3, BuiltinImpl::GlslExt(GLOp::FClamp));
        self.register("_Z5clampiii", 3, BuiltinImpl::GlslExt(GLOp::SClamp));
        self.register(
            "_Z5clampDv3_fff",
            3,
            BuiltinImpl::Custom(CustomImpl::ClampVectorScalar(GLOp::FClamp)),
        );
        self.register(
            "_Z5clampDv3_iii",
            3,
            BuiltinImpl::Custom(CustomImpl::ClampVectorScalar(GLOp::UClamp)),
        );
    }

    fn register_geometry(&mut self) {
        self.register("_Z3dotDv2_fS_", 2, BuiltinImpl::SpirvOp(Op::Dot));
        self.register("_Z3dotDv3_fS_", 2, BuiltinImpl::SpirvOp(Op::Dot));
    }

    fn register_color(&mut self) {
        self.register("rsUnpackColor8888", 1, BuiltinImpl::Custom(CustomImpl::UnpackColor8888));
        self.register(
            "_Z17rsPackColorTo8888Dv4_f",
            1,
            BuiltinImpl::Custom(CustomImpl::PackColorTo8888),
        );
    }
}
