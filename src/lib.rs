//! loopspec translates the geometry of neural network layers into workload
//! documents for loop-nest mapping tools.
//!
//! A workload document describes an operator as a set of named iteration
//! dimensions with bounds, plus a projection for each tensor operand which
//! maps iteration coordinates to the operand's coordinates. Mapping tools use
//! these documents to search for efficient schedules of the operator on an
//! accelerator.
//!
//! # Converting layers
//!
//! The basic workflow is:
//!
//! 1. Obtain [`LayerInfo`] records describing each layer of a model: its
//!    operator kind, input and output shapes and module parameters. These are
//!    typically produced by running the model with instrumentation and
//!    saved as JSON.
//! 2. Classify each record into a typed [`LayerDescription`] using an
//!    [`OpRegistry`].
//! 3. Translate the description into a [`Workload`] using
//!    [`Translate::translate`].
//!
//! [`Converter`] combines these steps for a whole model:
//!
//! ```
//! use loopspec::{Converter, LayerInfo, TranslateMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layers: Vec<LayerInfo> = serde_json::from_str(r#"[{
//!     "name": "conv1",
//!     "kind": "conv2d",
//!     "inputs": [{"name": "x", "shape": [1, 3, 32, 32]}],
//!     "output_shape": [1, 8, 32, 32],
//!     "attrs": {"kernel_size": 3, "padding": 1}
//! }]"#)?;
//!
//! let converter = Converter::new(TranslateMode::Fused);
//! for layer in converter.convert_all(&layers)? {
//!     assert_eq!(layer.workload.bound("P"), Some(32));
//! }
//! # Ok(()) }
//! ```
//!
//! # Templates
//!
//! Some operator kinds are translated by applying overrides to a base schema
//! (see [`ProblemTemplate`]). By default these are embedded in the library.
//! Set `LOOPSPEC_TEMPLATE_DIR` to load them from a directory instead.
//!
//! # Translation modes
//!
//! [`TranslateMode::Legacy`] produces documents that only use affine
//! projections and integer bounds. [`TranslateMode::Fused`] additionally
//! allows expression projections, which are needed to describe reshapes.

mod convert;
pub mod env;
mod op_registry;
pub mod ops;
mod templates;
mod workload;

pub use convert::{ConvertError, ConvertedLayer, Converter};
pub use op_registry::{
    Attrs, ClassifyError, ClassifyFn, LayerInfo, OpKind, OpRegistry, Size2, TensorInfo,
};
pub use ops::{LayerDescription, Translate, TranslateError, TranslateMode};
pub use templates::{
    default_provider, BuiltinTemplates, DirTemplates, ProblemTemplate, TemplateError,
    TemplateProvider,
};
pub use workload::{
    Coefficient, DataSpace, Instance, InvalidTerm, Problem, ProblemShape, Projection, Term,
    Workload,
};

// Re-export the geometry crate for callers constructing descriptions by hand.
pub use loopspec_shape;
