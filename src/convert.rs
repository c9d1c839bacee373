//! Conversion of whole models, given as a list of layer records.

use std::error::Error;
use std::fmt;

use rayon::prelude::*;

use crate::op_registry::{ClassifyError, LayerInfo, OpRegistry};
use crate::ops::{Translate, TranslateError, TranslateMode};
use crate::templates::{default_provider, TemplateProvider};
use crate::workload::Workload;

/// Error converting one layer of a model.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvertError {
    Classify { layer: String, error: ClassifyError },
    Translate { layer: String, error: TranslateError },
}

impl ConvertError {
    /// Name of the layer which failed to convert.
    pub fn layer(&self) -> &str {
        match self {
            Self::Classify { layer, .. } | Self::Translate { layer, .. } => layer,
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classify { layer, error } => {
                write!(f, "failed to classify layer \"{}\": {}", layer, error)
            }
            Self::Translate { layer, error } => {
                write!(f, "failed to translate layer \"{}\": {}", layer, error)
            }
        }
    }
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Classify { error, .. } => Some(error),
            Self::Translate { error, .. } => Some(error),
        }
    }
}

/// Workload generated for one layer of a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedLayer {
    /// One-based position of the layer among the converted layers.
    pub index: usize,

    /// Name of the layer record.
    pub name: String,

    pub workload: Workload,
}

impl ConvertedLayer {
    /// File name for the workload, `{model}_layer{index}.{ext}`.
    pub fn file_name(&self, model_name: &str, ext: &str) -> String {
        format!("{}_layer{}.{}", model_name, self.index, ext)
    }
}

/// Converts layer records into workloads.
pub struct Converter {
    registry: OpRegistry,
    templates: Box<dyn TemplateProvider>,
    mode: TranslateMode,
    exclude: Vec<String>,
}

impl Converter {
    /// Create a converter with handlers for all built-in operator kinds and
    /// the template provider selected by the environment.
    pub fn new(mode: TranslateMode) -> Converter {
        Converter {
            registry: OpRegistry::with_all_ops(),
            templates: default_provider(),
            mode,
            exclude: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: OpRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_templates(mut self, templates: Box<dyn TemplateProvider>) -> Self {
        self.templates = templates;
        self
    }

    /// Skip layers whose names contain `fragment` anywhere (as a prefix,
    /// suffix or infix).
    pub fn exclude(mut self, fragment: impl Into<String>) -> Self {
        self.exclude.push(fragment.into());
        self
    }

    pub fn mode(&self) -> TranslateMode {
        self.mode
    }

    /// Return true if a layer is skipped by the exclusion list.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude
            .iter()
            .any(|fragment| name.contains(fragment.as_str()))
    }

    /// Convert a single layer record.
    pub fn convert(&self, info: &LayerInfo) -> Result<Workload, ConvertError> {
        let desc = self
            .registry
            .classify(info)
            .map_err(|error| ConvertError::Classify {
                layer: info.name.clone(),
                error,
            })?;
        desc.translate(self.mode, self.templates.as_ref())
            .map_err(|error| ConvertError::Translate {
                layer: info.name.clone(),
                error,
            })
    }

    /// Convert all layers which are not excluded.
    ///
    /// Layers are converted in parallel. Results are returned in the order of
    /// `layers` and numbered from 1. Fails if any layer fails to convert, with
    /// the error of the earliest such layer in `layers`.
    pub fn convert_all(&self, layers: &[LayerInfo]) -> Result<Vec<ConvertedLayer>, ConvertError> {
        let selected: Vec<&LayerInfo> = layers
            .iter()
            .filter(|info| {
                let excluded = self.is_excluded(&info.name);
                if excluded {
                    log::debug!("skipping excluded layer {}", info.name);
                }
                !excluded
            })
            .collect();

        let results: Vec<_> = selected
            .par_iter()
            .enumerate()
            .map(|(i, info)| -> Result<ConvertedLayer, ConvertError> {
                Ok(ConvertedLayer {
                    index: i + 1,
                    name: info.name.clone(),
                    workload: self.convert(info)?,
                })
            })
            .collect();

        // Collecting sequentially stops at the first error in input order.
        results.into_iter().collect()
    }
}
