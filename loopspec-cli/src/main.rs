use std::collections::VecDeque;
use std::error::Error;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use loopspec::{Converter, TranslateMode};

mod layer_file;

use layer_file::{model_name_from_path, read_layers, write_workloads, OutputFormat};

#[derive(Debug)]
struct Args {
    /// Path to JSON file containing layer records.
    layers: PathBuf,

    /// Directory to write workload files into. If `None`, workloads are
    /// printed to stdout.
    out_dir: Option<PathBuf>,

    /// Model name used for the output directory and file names.
    model_name: Option<String>,

    /// Substrings of layer names to skip.
    exclude: Vec<String>,

    mode: TranslateMode,
    format: OutputFormat,
    verbose: bool,
}

/// Parse command-line arguments, excluding the binary name.
///
/// `fused_default` sets the translation mode used if neither `--fused` nor
/// `--legacy` is given.
fn parse_args(
    args: impl IntoIterator<Item = impl Into<OsString>>,
    fused_default: bool,
) -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut values = VecDeque::new();
    let mut out_dir = None;
    let mut model_name = None;
    let mut exclude = Vec::new();
    let mut fused = fused_default;
    let mut format = OutputFormat::Yaml;
    let mut verbose = false;

    let mut parser = lexopt::Parser::from_args(args);
    while let Some(arg) = parser.next()? {
        match arg {
            Value(val) => values.push_back(val.string()?),
            Short('o') | Long("out-dir") => out_dir = Some(PathBuf::from(parser.value()?)),
            Short('n') | Long("model-name") => model_name = Some(parser.value()?.string()?),
            Short('x') | Long("exclude") => exclude.push(parser.value()?.string()?),
            Long("fused") => fused = true,
            Long("legacy") => fused = false,
            Long("json") => format = OutputFormat::Json,
            Short('v') | Long("verbose") => verbose = true,
            Short('h') | Long("help") => {
                println!(
                    "Convert layer records into workload files.

Usage: {bin_name} [OPTIONS] <layers>

Args:
  <layers>
    JSON file containing an array of layer records

Options:
  -o, --out-dir <dir>
    Write workloads to <dir>/<model>/<model>_layer<i>.yaml.
    If not set, workloads are printed to stdout.

  -n, --model-name <name>
    Model name used for output paths. Defaults to the layer file's name.

  -x, --exclude <fragment>
    Skip layers whose names contain <fragment>. May be repeated.

  --fused
    Generate workloads for fused mapping. This allows reshape layers.
    Also enabled by setting LOOPSPEC_FUSED=1.

  --legacy
    Generate workloads which use only affine projections

  --json
    Write workloads as JSON instead of YAML

  -v, --verbose
    Enable verbose logging

  -h, --help
    Print help
",
                    bin_name = parser.bin_name().unwrap_or("loopspec")
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let layers = values.pop_front().ok_or("missing `<layers>` arg")?;
    if let Some(extra) = values.pop_front() {
        return Err(lexopt::Error::UnexpectedArgument(extra.into()));
    }

    Ok(Args {
        layers: layers.into(),
        out_dir,
        model_name,
        exclude,
        mode: if fused {
            TranslateMode::Fused
        } else {
            TranslateMode::Legacy
        },
        format,
        verbose,
    })
}

/// Tool which converts a file of layer records, extracted from a neural
/// network, into workload files for loop-nest mapping tools.
///
/// ```
/// loopspec --out-dir workloads resnet18.json
/// ```
///
/// Log output can be configured using `RUST_LOG`.
fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args(
        std::env::args_os().skip(1),
        loopspec::env::fused_by_default(),
    )?;

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let model_name = args
        .model_name
        .clone()
        .unwrap_or_else(|| model_name_from_path(&args.layers));
    let layers = read_layers(&args.layers)?;

    let converter = args
        .exclude
        .iter()
        .fold(Converter::new(args.mode), |converter, fragment| {
            converter.exclude(fragment.as_str())
        });

    log::info!(
        "converting {} layers of {} in {} mode",
        layers.len(),
        model_name,
        args.mode
    );
    let converted = converter.convert_all(&layers)?;

    match &args.out_dir {
        Some(out_dir) => {
            let paths = write_workloads(out_dir, &model_name, &converted, args.format)?;
            log::info!(
                "conversion complete, wrote {} workloads to {}",
                paths.len(),
                out_dir.join(&model_name).display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            for layer in &converted {
                let doc = args.format.serialize(&layer.workload)?;
                if args.format == OutputFormat::Yaml {
                    writeln!(stdout, "---")?;
                }
                write!(stdout, "{}", doc)?;
            }
            log::info!("conversion complete");
        }
    }

    Ok(())
}
