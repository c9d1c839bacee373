//! Base workload schemas which template-based translations start from.
//!
//! Several operator kinds share a schema and only override its instance
//! bounds (eg. matrix multiplication modelled as a convolution). Schemas are
//! obtained through a [`TemplateProvider`]. The default provider uses
//! templates embedded in the library. A directory of template files can be
//! used instead by setting `LOOPSPEC_TEMPLATE_DIR`.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::workload::Workload;

/// Identifies a base schema.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProblemTemplate {
    Convolution,
    Pool,
    Matmul,
    Softmax,
    BinaryElementwise,
}

impl ProblemTemplate {
    /// All template kinds.
    pub const ALL: [ProblemTemplate; 5] = [
        ProblemTemplate::Convolution,
        ProblemTemplate::Pool,
        ProblemTemplate::Matmul,
        ProblemTemplate::Softmax,
        ProblemTemplate::BinaryElementwise,
    ];

    /// Name of the template. This is also the file stem used by
    /// [`DirTemplates`].
    pub fn name(self) -> &'static str {
        match self {
            ProblemTemplate::Convolution => "convolution",
            ProblemTemplate::Pool => "pool",
            ProblemTemplate::Matmul => "matmul",
            ProblemTemplate::Softmax => "softmax",
            ProblemTemplate::BinaryElementwise => "binary_elementwise",
        }
    }

    fn builtin_source(self) -> &'static str {
        match self {
            ProblemTemplate::Convolution => include_str!("templates/convolution.json"),
            ProblemTemplate::Pool => include_str!("templates/pool.json"),
            ProblemTemplate::Matmul => include_str!("templates/matmul.json"),
            ProblemTemplate::Softmax => include_str!("templates/softmax.json"),
            ProblemTemplate::BinaryElementwise => {
                include_str!("templates/binary_elementwise.json")
            }
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProblemTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors when loading a template.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateError {
    /// No template file exists for the template.
    NotFound { name: String, dir: PathBuf },

    /// A template file exists but could not be read.
    Io { path: PathBuf, error: String },

    /// The template is not a valid workload document.
    Parse { name: String, error: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name, dir } => {
                write!(f, "template \"{}\" not found in {}", name, dir.display())
            }
            Self::Io { path, error } => {
                write!(f, "failed to read template {}: {}", path.display(), error)
            }
            Self::Parse { name, error } => {
                write!(f, "failed to parse template \"{}\": {}", name, error)
            }
        }
    }
}

impl Error for TemplateError {}

/// Source of base schemas for template-based translations.
///
/// Providers must hand out a fresh copy of the schema on each call, so that
/// overrides applied by one translation are never visible to another.
pub trait TemplateProvider: Sync {
    fn template(&self, kind: ProblemTemplate) -> Result<Workload, TemplateError>;
}

/// Contents of a template file.
///
/// Files may hold either a bare workload or one wrapped in a `problem` key,
/// the layout used by workload files.
#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    Wrapped { problem: Workload },
    Bare(Workload),
}

impl From<TemplateFile> for Workload {
    fn from(file: TemplateFile) -> Workload {
        match file {
            TemplateFile::Wrapped { problem } => problem,
            TemplateFile::Bare(workload) => workload,
        }
    }
}

fn parse_json(name: &str, src: &str) -> Result<Workload, TemplateError> {
    serde_json::from_str::<TemplateFile>(src)
        .map(Workload::from)
        .map_err(|err| TemplateError::Parse {
            name: name.to_string(),
            error: err.to_string(),
        })
}

fn parse_yaml(name: &str, src: &str) -> Result<Workload, TemplateError> {
    serde_yaml::from_str::<TemplateFile>(src)
        .map(Workload::from)
        .map_err(|err| TemplateError::Parse {
            name: name.to_string(),
            error: err.to_string(),
        })
}

/// Provider for the templates embedded in the library.
///
/// Each template is parsed the first time it is requested and cached for the
/// lifetime of the provider.
#[derive(Default)]
pub struct BuiltinTemplates {
    cache: [OnceLock<Result<Workload, TemplateError>>; 5],
}

impl BuiltinTemplates {
    pub fn new() -> BuiltinTemplates {
        BuiltinTemplates::default()
    }

    /// Return a process-wide instance of the provider.
    pub fn shared() -> &'static BuiltinTemplates {
        static SHARED: OnceLock<BuiltinTemplates> = OnceLock::new();
        SHARED.get_or_init(BuiltinTemplates::new)
    }
}

impl TemplateProvider for BuiltinTemplates {
    fn template(&self, kind: ProblemTemplate) -> Result<Workload, TemplateError> {
        self.cache[kind.index()]
            .get_or_init(|| parse_json(kind.name(), kind.builtin_source()))
            .clone()
    }
}

/// Provider which loads templates from `{dir}/{name}.json`,
/// `{dir}/{name}.yaml` or `{dir}/{name}.yml`.
///
/// Successfully loaded templates are cached. Failures are not, so a missing
/// file can be added while the provider is in use.
pub struct DirTemplates {
    dir: PathBuf,
    cache: Mutex<FxHashMap<ProblemTemplate, Workload>>,
}

impl DirTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> DirTemplates {
        DirTemplates {
            dir: dir.into(),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load(&self, kind: ProblemTemplate) -> Result<Workload, TemplateError> {
        let name = kind.name();
        for ext in ["json", "yaml", "yml"] {
            let path = self.dir.join(format!("{}.{}", name, ext));
            if !path.is_file() {
                continue;
            }
            let src = std::fs::read_to_string(&path).map_err(|err| TemplateError::Io {
                path: path.clone(),
                error: err.to_string(),
            })?;
            log::debug!("loaded template {} from {}", name, path.display());
            return if ext == "json" {
                parse_json(name, &src)
            } else {
                parse_yaml(name, &src)
            };
        }
        Err(TemplateError::NotFound {
            name: name.to_string(),
            dir: self.dir.clone(),
        })
    }
}

impl TemplateProvider for DirTemplates {
    fn template(&self, kind: ProblemTemplate) -> Result<Workload, TemplateError> {
        // A panic while holding the lock cannot leave a partially inserted
        // entry, so a poisoned cache is still usable.
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(&kind)
            .cloned();
        if let Some(workload) = cached {
            return Ok(workload);
        }
        let workload = self.load(kind)?;
        self.cache
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(kind, workload.clone());
        Ok(workload)
    }
}

/// Return the template provider selected by the environment.
///
/// This is a [`DirTemplates`] provider if `LOOPSPEC_TEMPLATE_DIR` is set, or
/// the embedded templates otherwise.
pub fn default_provider() -> Box<dyn TemplateProvider> {
    match crate::env::template_dir() {
        Some(dir) => {
            log::info!("using templates from {}", dir.display());
            Box::new(DirTemplates::new(dir))
        }
        None => Box::new(BuiltinTemplates::new()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use loopspec_testing::TestCases;

    use super::{
        BuiltinTemplates, DirTemplates, ProblemTemplate, TemplateError, TemplateProvider,
    };
    use crate::workload::Projection;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "loopspec-templates-{}-{}",
            label,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_builtin_templates_parse() {
        let templates = BuiltinTemplates::new();

        ProblemTemplate::ALL.test_each(|kind| {
            let workload = templates.template(*kind).unwrap();
            assert!(!workload.shape.data_spaces.is_empty());
            let outputs = workload.shape.data_spaces.last().unwrap();
            assert!(outputs.read_write, "last data-space of {} is not read-write", kind);
        });
    }

    #[test]
    fn test_builtin_pool_template() {
        let pool = BuiltinTemplates::shared()
            .template(ProblemTemplate::Pool)
            .unwrap();
        assert_eq!(pool.shape.dimensions, ["R", "S", "P", "Q", "C", "N"]);
        assert_eq!(pool.coefficient("Hstride").map(|c| c.default), Some(1));
        assert!(pool.data_space("Weights").is_none());

        let inputs = pool.data_space("Inputs").unwrap();
        let axes = inputs.projection.axes().unwrap();
        assert_eq!(axes.len(), 4);
        assert_eq!(axes[2].len(), 2);
        assert_eq!(axes[2][1].coefficient.as_deref(), Some("Hstride"));
    }

    #[test]
    fn test_template_copies_are_independent() {
        let templates = BuiltinTemplates::new();
        let mut first = templates.template(ProblemTemplate::Matmul).unwrap();
        first.shape.data_spaces[0].projection = Projection::Expr("[ M ]".into());

        let second = templates.template(ProblemTemplate::Matmul).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_dir_templates() {
        let dir = temp_dir("dir");
        std::fs::write(
            dir.join("softmax.yaml"),
            "problem:\n  shape:\n    name: Custom\n    dimensions: [A]\n    data-spaces:\n      - name: Input\n        projection: [[[A]]]\n  instance:\n    A: 4\n",
        )
        .unwrap();
        std::fs::write(dir.join("matmul.json"), "{\"shape\": 3}").unwrap();

        let templates = DirTemplates::new(&dir);

        let softmax = templates.template(ProblemTemplate::Softmax).unwrap();
        assert_eq!(softmax.shape.name, "Custom");
        assert_eq!(softmax.bound("A"), Some(4));

        assert!(matches!(
            templates.template(ProblemTemplate::Matmul),
            Err(TemplateError::Parse { .. })
        ));
        assert_eq!(
            templates.template(ProblemTemplate::Pool),
            Err(TemplateError::NotFound {
                name: "pool".to_string(),
                dir: dir.clone()
            })
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
