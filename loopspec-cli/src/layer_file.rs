//! Reading layer records and writing workload files.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use loopspec::{ConvertedLayer, LayerInfo, Workload};

/// Serialization format for workload files.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl OutputFormat {
    /// File extension used for workload files in this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }

    /// Serialize a workload as a document with a top-level `problem` key.
    pub fn serialize(self, workload: &Workload) -> Result<String, LayerFileError> {
        let problem = workload.as_problem();
        match self {
            Self::Yaml => serde_yaml::to_string(&problem)
                .map_err(|err| LayerFileError::Serialize(err.to_string())),
            Self::Json => serde_json::to_string_pretty(&problem)
                .map(|mut json| {
                    json.push('\n');
                    json
                })
                .map_err(|err| LayerFileError::Serialize(err.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum LayerFileError {
    Io { path: PathBuf, error: io::Error },
    Parse { path: PathBuf, error: String },
    Serialize(String),
}

impl fmt::Display for LayerFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "{}: {}", path.display(), error),
            Self::Parse { path, error } => {
                write!(f, "failed to parse layers in {}: {}", path.display(), error)
            }
            Self::Serialize(error) => write!(f, "failed to serialize workload: {}", error),
        }
    }
}

impl Error for LayerFileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Parse a JSON array of layer records.
pub fn parse_layers(path: &Path, json: &str) -> Result<Vec<LayerInfo>, LayerFileError> {
    serde_json::from_str(json).map_err(|err| LayerFileError::Parse {
        path: path.to_path_buf(),
        error: err.to_string(),
    })
}

/// Read a JSON array of layer records from `path`.
pub fn read_layers(path: &Path) -> Result<Vec<LayerInfo>, LayerFileError> {
    let json = fs::read_to_string(path).map_err(|error| LayerFileError::Io {
        path: path.to_path_buf(),
        error,
    })?;
    parse_layers(path, &json)
}

/// Derive a model name from the layer file name, eg. `resnet18` for
/// `path/to/resnet18.json`.
pub fn model_name_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("model")
        .to_string()
}

/// Write each converted layer to `{out_dir}/{model}/{model}_layer{i}.{ext}`,
/// creating directories as needed.
///
/// Returns the paths of the files written.
pub fn write_workloads(
    out_dir: &Path,
    model_name: &str,
    layers: &[ConvertedLayer],
    format: OutputFormat,
) -> Result<Vec<PathBuf>, LayerFileError> {
    let model_dir = out_dir.join(model_name);
    fs::create_dir_all(&model_dir).map_err(|error| LayerFileError::Io {
        path: model_dir.clone(),
        error,
    })?;

    let mut paths = Vec::with_capacity(layers.len());
    for layer in layers {
        let path = model_dir.join(layer.file_name(model_name, format.extension()));
        let doc = format.serialize(&layer.workload)?;
        fs::write(&path, doc).map_err(|error| LayerFileError::Io {
            path: path.clone(),
            error,
        })?;
        log::debug!("wrote {} for layer {}", path.display(), layer.name);
        paths.push(path);
    }
    Ok(paths)
}
