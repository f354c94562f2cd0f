use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rspirv::binary::Disassemble;
use rsov_core::error::TranslateError;
use rsov_core::word_stream::InputWordStream;
use rsov_core::{KernelSignature, KernelSignatures, Module, Translator};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "rsov")]
#[command(about = "Translates RenderScript builtins in SPIR-V kernels into Vulkan compute constructs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite builtin calls in a SPIR-V module
    Translate {
        /// Input SPIR-V file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output SPIR-V file (defaults to the input name with a .vk.spv extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Kernel signature, e.g. "uchar4 invert(uchar4, x, y)". Repeat for each kernel.
        #[arg(short, long = "kernel", value_name = "SIGNATURE")]
        kernels: Vec<KernelSignature>,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Disassemble a SPIR-V module
    Dump {
        /// Input SPIR-V file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Commands::Translate { verbose, .. } | Commands::Dump { verbose, .. } => *verbose,
        }
    }
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Translation error: {0}")]
    TranslationError(#[from] TranslateError),

    #[error("Kernel '{0}' is given more than once")]
    DuplicateKernel(String),

    #[error("Disassembly error: {0}")]
    DisassemblyError(String),
}

impl DriverError {
    fn exit_code(&self) -> u8 {
        match self {
            DriverError::TranslationError(e) => e.code() as u8,
            _ => 1,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.command.verbose() { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Translate {
            input,
            output,
            kernels,
            verbose,
        } => translate_file(input, output, kernels, verbose),
        Commands::Dump { input, verbose } => dump_file(input, verbose),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn translate_file(
    input: PathBuf,
    output: Option<PathBuf>,
    kernels: Vec<KernelSignature>,
    verbose: bool,
) -> Result<(), DriverError> {
    if verbose {
        info!("Translating {}...", input.display());
    }

    let mut signatures = KernelSignatures::new();
    for kernel in kernels {
        let name = kernel.name.clone();
        if !signatures.insert(kernel) {
            return Err(DriverError::DuplicateKernel(name));
        }
    }
    if signatures.is_empty() {
        warn!("No kernel signatures given; coordinate builtins cannot be translated");
    }
    if verbose {
        for sig in signatures.iter() {
            info!("Kernel {}", sig);
        }
    }

    let bytes = fs::read(&input)?;
    let translated = Translator::new(signatures).translate_bytes(&bytes)?;

    // Determine output path
    let output_path = output.unwrap_or_else(|| {
        let mut path = input.clone();
        path.set_extension("vk.spv");
        path
    });

    // Written only once translation succeeded
    fs::write(&output_path, &translated)?;

    if verbose {
        info!("Successfully translated to {}", output_path.display());
        info!("Wrote {} words of SPIR-V", translated.len() / 4);
    }

    Ok(())
}

fn dump_file(input: PathBuf, verbose: bool) -> Result<(), DriverError> {
    let bytes = fs::read(&input)?;
    let words: Vec<u32> = {
        let mut stream = InputWordStream::from_bytes(&bytes)?;
        let count = stream.remaining();
        stream.read_n(count)?.to_vec()
    };

    if verbose {
        let module = Module::from_words(words.clone())?;
        info!(
            "{}: bound {}, {} function(s), {} entry point(s)",
            input.display(),
            module.bound(),
            module.functions.len(),
            module.entry_points.len()
        );
    }

    let module = rspirv::dr::load_words(&words).map_err(|e| DriverError::DisassemblyError(format!("{:?}", e)))?;
    println!("{}", module.disassemble());
    Ok(())
}
