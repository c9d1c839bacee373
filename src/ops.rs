//! Typed descriptions of neural network layers and their translation into
//! workload documents.
//!
//! Each supported layer kind has a description type holding the resolved
//! geometry of one layer (eg. [`ConvDesc`]), and an implementation of
//! [`Translate`] which derives the layer's iteration space. Descriptions are
//! built by the [`OpRegistry`](crate::OpRegistry) from layer records, or can
//! be constructed directly.

use std::error::Error;
use std::fmt;

use loopspec_shape::GeometryError;

use crate::templates::{ProblemTemplate, TemplateError, TemplateProvider};
use crate::workload::{Projection, Term, Workload};

mod binary_elementwise;
mod conv;
mod layout;
mod matmul;
mod pooling;
mod softmax;

pub use binary_elementwise::BinaryElementwiseDesc;
pub use conv::ConvDesc;
pub use layout::ViewDesc;
pub use matmul::{MatmulConvDesc, MatmulDesc};
pub use pooling::PoolDesc;
pub use softmax::SoftmaxDesc;

/// Flavor of workload document to produce.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TranslateMode {
    /// Documents restricted to affine projections and integer bounds.
    #[default]
    Legacy,

    /// Documents which may also use projection expressions and constraint
    /// strings. Required for reshapes.
    Fused,
}

impl fmt::Display for TranslateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Fused => write!(f, "fused"),
        }
    }
}

/// Errors when translating a layer description into a workload.
#[derive(Clone, Debug, PartialEq)]
pub enum TranslateError {
    /// The shapes or parameters in a description are inconsistent.
    IncompatibleShapes {
        op: &'static str,
        shapes: Vec<Vec<usize>>,
        reason: String,
    },

    /// A size formula failed for the description's geometry.
    InvalidGeometry {
        op: &'static str,
        error: GeometryError,
    },

    /// The layer kind cannot be expressed in the requested mode.
    UnsupportedMode { op: &'static str, mode: TranslateMode },

    /// The base schema for the layer could not be loaded.
    Template(TemplateError),
}

impl TranslateError {
    pub(crate) fn incompatible(
        op: &'static str,
        shapes: &[&[usize]],
        reason: impl Into<String>,
    ) -> Self {
        Self::IncompatibleShapes {
            op,
            shapes: shapes.iter().map(|s| s.to_vec()).collect(),
            reason: reason.into(),
        }
    }

    pub(crate) fn geometry(op: &'static str) -> impl Fn(GeometryError) -> TranslateError {
        move |error| TranslateError::InvalidGeometry { op, error }
    }
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleShapes { op, shapes, reason } => {
                write!(f, "{} has incompatible shapes {:?}: {}", op, shapes, reason)
            }
            Self::InvalidGeometry { op, error } => {
                write!(f, "{} has invalid geometry: {}", op, error)
            }
            Self::UnsupportedMode { op, mode } => {
                write!(f, "{} cannot be translated in {} mode", op, mode)
            }
            Self::Template(err) => write!(f, "template error: {}", err),
        }
    }
}

impl Error for TranslateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidGeometry { error, .. } => Some(error),
            Self::Template(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TemplateError> for TranslateError {
    fn from(val: TemplateError) -> Self {
        TranslateError::Template(val)
    }
}

/// Translate a layer description into a workload document.
///
/// Translation never modifies the description, so translating the same
/// description twice yields identical documents.
pub trait Translate {
    fn translate(
        &self,
        mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError>;
}

/// Description of one layer, of any supported kind.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerDescription {
    Conv(ConvDesc),
    Pool(PoolDesc),
    Matmul(MatmulDesc),
    MatmulConv(MatmulConvDesc),
    BinaryElementwise(BinaryElementwiseDesc),
    Softmax(SoftmaxDesc),
    View(ViewDesc),
}

impl LayerDescription {
    /// Name of the layer.
    pub fn name(&self) -> &str {
        match self {
            Self::Conv(desc) => &desc.name,
            Self::Pool(desc) => &desc.name,
            Self::Matmul(desc) => &desc.name,
            Self::MatmulConv(desc) => &desc.name,
            Self::BinaryElementwise(desc) => &desc.name,
            Self::Softmax(desc) => &desc.name,
            Self::View(desc) => &desc.name,
        }
    }

    /// Base schema that translation starts from, or `None` if the document is
    /// built from scratch.
    pub fn problem_template(&self) -> Option<ProblemTemplate> {
        match self {
            Self::Conv(_) | Self::View(_) => None,
            Self::Pool(_) => Some(ProblemTemplate::Pool),
            Self::Matmul(_) => Some(ProblemTemplate::Matmul),
            Self::MatmulConv(_) => Some(ProblemTemplate::Convolution),
            Self::BinaryElementwise(_) => Some(ProblemTemplate::BinaryElementwise),
            Self::Softmax(_) => Some(ProblemTemplate::Softmax),
        }
    }

    /// Short name of the description's kind, used in errors and logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Conv(desc) if desc.transposed => "ConvTranspose",
            Self::Conv(_) => "Conv",
            Self::Pool(_) => "Pool",
            Self::Matmul(_) => "Matmul",
            Self::MatmulConv(_) => "MatmulConv",
            Self::BinaryElementwise(_) => "BinaryElementwise",
            Self::Softmax(_) => "Softmax",
            Self::View(_) => "View",
        }
    }
}

impl Translate for LayerDescription {
    fn translate(
        &self,
        mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        let workload = match self {
            Self::Conv(desc) => desc.translate(mode, templates),
            Self::Pool(desc) => desc.translate(mode, templates),
            Self::Matmul(desc) => desc.translate(mode, templates),
            Self::MatmulConv(desc) => desc.translate(mode, templates),
            Self::BinaryElementwise(desc) => desc.translate(mode, templates),
            Self::Softmax(desc) => desc.translate(mode, templates),
            Self::View(desc) => desc.translate(mode, templates),
        }?;
        log::debug!(
            "translated {} layer {} to {} dims",
            self.kind_name(),
            workload.shape.name,
            workload.shape.dimensions.len()
        );
        Ok(workload)
    }
}

macro_rules! impl_from_desc {
    ($desc:ident, $variant:ident) => {
        impl From<$desc> for LayerDescription {
            fn from(desc: $desc) -> LayerDescription {
                LayerDescription::$variant(desc)
            }
        }
    };
}

impl_from_desc!(ConvDesc, Conv);
impl_from_desc!(PoolDesc, Pool);
impl_from_desc!(MatmulDesc, Matmul);
impl_from_desc!(MatmulConvDesc, MatmulConv);
impl_from_desc!(BinaryElementwiseDesc, BinaryElementwise);
impl_from_desc!(SoftmaxDesc, Softmax);
impl_from_desc!(ViewDesc, View);

/// Replace the projections of every data-space in a template with an
/// identity projection over `dims`.
fn set_identity_projections(workload: &mut Workload, dims: &[String]) {
    for ds in workload.shape.data_spaces.iter_mut() {
        ds.projection = Projection::identity(dims);
    }
}

/// Return the affine axes of a template data-space, failing if the template
/// uses an expression projection.
fn affine_axes_mut<'a>(
    template: ProblemTemplate,
    projection: &'a mut Projection,
) -> Result<&'a mut Vec<Vec<Term>>, TranslateError> {
    match projection {
        Projection::Affine(axes) => Ok(axes),
        Projection::Expr(_) => Err(TemplateError::Parse {
            name: template.name().to_string(),
            error: "expected affine projections".to_string(),
        }
        .into()),
    }
}

/// Return the positions of the data-spaces `names` in a template, failing
/// if any of them is missing.
fn template_data_spaces<const N: usize>(
    template: ProblemTemplate,
    workload: &Workload,
    names: [&str; N],
) -> Result<[usize; N], TranslateError> {
    let mut indices = [0; N];
    for (index, name) in indices.iter_mut().zip(names) {
        *index = workload
            .shape
            .data_spaces
            .iter()
            .position(|ds| ds.name == name)
            .ok_or_else(|| TemplateError::Parse {
                name: template.name().to_string(),
                error: format!("missing data-space \"{}\"", name),
            })?;
    }
    Ok(indices)
}
