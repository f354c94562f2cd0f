//! Kernel signature descriptors supplied by the front end, and the naming
//! scheme for the wrappers generated around kernels.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const COORDS_NAMES: [&str; 3] = ["x", "y", "z"];

const WRAPPER_PREFIX: &str = "__rsov_";
const ENTRY_PREFIX: &str = "__rsov_entry_";

/// Coordinate arity of a kernel. The numeric value is the component count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Coords {
    #[default]
    None = 0,
    X = 1,
    XY = 2,
    XYZ = 3,
}

impl Coords {
    pub fn count(self) -> usize {
        self as usize
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            0 => Some(Coords::None),
            1 => Some(Coords::X),
            2 => Some(Coords::XY),
            3 => Some(Coords::XYZ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub return_type: String,
    pub argument_types: Vec<String>,
    pub coords: Coords,
}

impl KernelSignature {
    /// `params` lists every parameter of the kernel function; the trailing
    /// coordinate parameters are dropped.
    pub fn new(
        name: impl Into<String>,
        return_type: impl Into<String>,
        mut params: Vec<String>,
        coords: Coords,
    ) -> Self {
        params.truncate(params.len().saturating_sub(coords.count()));
        KernelSignature {
            name: name.into(),
            return_type: return_type.into(),
            argument_types: params,
            coords,
        }
    }

    pub fn wrapper_name(&self) -> String {
        format!("{}{}", ENTRY_PREFIX, self.name)
    }

    pub fn temp_name(&self, suffix: &str) -> String {
        format!("{}{}_{}", WRAPPER_PREFIX, self.name, suffix)
    }

    /// Whether `name` belongs to the generated wrapper namespace.
    pub fn is_wrapper(name: &str) -> bool {
        name.starts_with(WRAPPER_PREFIX)
    }

    /// Whether `name` is this kernel's wrapper entry or one of its
    /// temporaries. Names in the wrapper-entry form only match exactly, so a
    /// kernel called `entry` does not claim every other kernel's wrapper.
    pub fn owns_name(&self, name: &str) -> bool {
        if name == self.wrapper_name() {
            return true;
        }
        !name.starts_with(ENTRY_PREFIX) && name.starts_with(&self.temp_name(""))
    }
}

/// Renders as `ret name(arg, ..., x, y)`.
impl fmt::Display for KernelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self
            .argument_types
            .iter()
            .map(String::as_str)
            .chain(COORDS_NAMES.iter().copied().take(self.coords.count()))
            .collect();
        write!(f, "{} {}({})", self.return_type, self.name, params.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParseError(pub String);

impl fmt::Display for SignatureParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid kernel signature '{}', expected 'ret name(arg, ..., x, y)'", self.0)
    }
}

impl std::error::Error for SignatureParseError {}

/// Parses the [`Display`](fmt::Display) form. Trailing `x`, `y`, `z`
/// parameters, in that order, give the coordinate arity.
impl FromStr for KernelSignature {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SignatureParseError(s.to_string());
        let s_trim = s.trim();
        let open = s_trim.find('(').ok_or_else(err)?;
        let inner = s_trim[open + 1..].strip_suffix(')').ok_or_else(err)?;

        let mut head = s_trim[..open].split_whitespace();
        let return_type = head.next().ok_or_else(err)?;
        let name = head.next().ok_or_else(err)?;
        if head.next().is_some() {
            return Err(err());
        }

        let params: Vec<String> = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(|p| p.trim().to_string()).collect()
        };
        if params.iter().any(String::is_empty) {
            return Err(err());
        }

        let coord_count = params
            .iter()
            .rev()
            .take(COORDS_NAMES.len())
            .take_while(|p| COORDS_NAMES.contains(&p.as_str()))
            .count();
        let trailing = &params[params.len() - coord_count..];
        if trailing.iter().map(String::as_str).ne(COORDS_NAMES.iter().copied().take(coord_count)) {
            return Err(err());
        }
        let coords = Coords::from_count(coord_count).ok_or_else(err)?;

        Ok(KernelSignature::new(name, return_type, params, coords))
    }
}

/// Caller-supplied mapping from kernel name to signature, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct KernelSignatures {
    signatures: Vec<KernelSignature>,
    by_name: HashMap<String, usize>,
}

impl KernelSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature. Returns `false` (and keeps the first) on a duplicate
    /// kernel name.
    pub fn insert(&mut self, signature: KernelSignature) -> bool {
        if self.by_name.contains_key(&signature.name) {
            return false;
        }
        self.by_name.insert(signature.name.clone(), self.signatures.len());
        self.signatures.push(signature);
        true
    }

    pub fn get(&self, name: &str) -> Option<&KernelSignature> {
        self.by_name.get(name).map(|i| &self.signatures[*i])
    }

    /// The kernel whose function is called `name`, either directly or through
    /// its wrapper entry.
    pub fn for_function_name(&self, name: &str) -> Option<&KernelSignature> {
        self.get(name)
            .or_else(|| self.signatures.iter().find(|sig| sig.wrapper_name() == name))
    }

    /// The kernel that owns a wrapper-prefixed name.
    pub fn owner_of(&self, name: &str) -> Option<&KernelSignature> {
        self.signatures.iter().find(|sig| sig.owns_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelSignature> {
        self.signatures.iter()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl FromIterator<KernelSignature> for KernelSignatures {
    fn from_iter<I: IntoIterator<Item = KernelSignature>>(iter: I) -> Self {
        let mut signatures = KernelSignatures::new();
        for signature in iter {
            signatures.insert(signature);
        }
        signatures
    }
}
