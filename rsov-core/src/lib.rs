pub mod builder;
pub mod builtin_registry;
pub mod error;
pub mod kernel_signature;
pub mod module;
pub mod translate;
pub mod word_stream;

#[cfg(test)]
pub(crate) mod test_fixtures;


pub use builder::Builder;
pub use error::{Result, TranslateError};
pub use kernel_signature::{Coords, KernelSignature, KernelSignatures};
pub use module::Module;
pub use translate::{translate_builtins, translate_words};

use word_stream::{InputWordStream, OutputWordStream};

/// Runs the builtin translation pass for a fixed set of kernels.
pub struct Translator {
    signatures: KernelSignatures,
}

impl Translator {
    pub fn new(signatures: KernelSignatures) -> Self {
        Translator { signatures }
    }

    pub fn signatures(&self) -> &KernelSignatures {
        &self.signatures
    }

    /// Translate a module given as words.
    pub fn translate(&self, words: Vec<u32>) -> Result<Vec<u32>> {
        translate_words(words, &self.signatures)
    }

    /// Translate a module given as a `.spv` byte image. The output is
    /// little-endian whatever the input byte order was.
    pub fn translate_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut module = Module::parse(InputWordStream::from_bytes(bytes)?)?;
        let words = {
            let mut builder = Builder::new(&mut module);
            translate_builtins(&mut builder, &self.signatures)?
        };
        let mut out = OutputWordStream::new();
        out.write_all(&words);
        Ok(out.into_bytes())
    }
}
