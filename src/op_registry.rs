//! Classification of layer records into typed layer descriptions.

use std::borrow::Cow;
use std::error::Error;
use std::fmt;

use loopspec_shape::geometry::{element_count, resolve_axis, transposed_output_size};
use loopspec_shape::{DimPadding, Shape};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ops::{
    BinaryElementwiseDesc, ConvDesc, LayerDescription, MatmulConvDesc, MatmulDesc, PoolDesc,
    SoftmaxDesc, ViewDesc,
};

/// Identifies the kind of operator which produced a layer record, eg.
/// `conv2d` or `softmax`.
///
/// Associated constants name the built-in kinds. Other kinds can be created
/// with [`OpKind::new`] and given a handler via [`OpRegistry::register`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpKind(Cow<'static, str>);

macro_rules! op_kinds {
    ($($const_name:ident = $name:literal),* $(,)?) => {
        impl OpKind {
            $(pub const $const_name: OpKind = OpKind(Cow::Borrowed($name));)*

            /// Kinds which have built-in handlers.
            pub const BUILTIN: &'static [OpKind] = &[$(OpKind::$const_name),*];
        }
    };
}

op_kinds!(
    CONV2D = "conv2d",
    CONV_TRANSPOSE2D = "conv_transpose2d",
    MAX_POOL2D = "max_pool2d",
    ADAPTIVE_AVG_POOL2D = "adaptive_avg_pool2d",
    LINEAR = "linear",
    MATMUL = "matmul",
    BMM = "bmm",
    ATTENTION_PROJECTION = "attention_projection",
    ADD = "add",
    SUB = "sub",
    MUL = "mul",
    DIV = "div",
    SOFTMAX = "softmax",
    VIEW = "view",
    RESHAPE = "reshape",
    FLATTEN = "flatten",
);

impl OpKind {
    pub fn new(name: impl Into<Cow<'static, str>>) -> OpKind {
        OpKind(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name and shape of a layer input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<usize>,
}

/// A pair of values for the height and width dimensions, which may be
/// written as a single value if both are equal.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Size2 {
    Scalar(usize),
    Pair([usize; 2]),
}

impl Size2 {
    /// Return the `[height, width]` pair.
    pub fn pair(self) -> [usize; 2] {
        match self {
            Size2::Scalar(x) => [x, x],
            Size2::Pair(hw) => hw,
        }
    }
}

/// Parameters of the module which produced a layer record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attrs {
    pub groups: Option<usize>,
    pub kernel_size: Option<Size2>,
    pub stride: Option<Size2>,
    pub padding: Option<Size2>,
    pub in_features: Option<usize>,
    pub out_features: Option<usize>,
    pub dim: Option<i32>,
}

/// Record of one operator observed while running a model.
///
/// All sizes are concrete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Unique name of the layer.
    pub name: String,
    pub kind: OpKind,
    #[serde(default)]
    pub inputs: Vec<TensorInfo>,
    pub output_shape: Vec<usize>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl LayerInfo {
    fn input(&self, index: usize) -> Result<&TensorInfo, ClassifyError> {
        self.inputs
            .get(index)
            .ok_or_else(|| self.unsupported_shapes(format!("missing input {}", index)))
    }

    /// Return the shape of a 4D `(n, c, h, w)` input.
    fn nchw_input(&self, index: usize) -> Result<[usize; 4], ClassifyError> {
        let shape = &self.input(index)?.shape;
        shape
            .as_slice()
            .try_into()
            .map_err(|_| self.unsupported_shapes(format!("input {} is not 4D", index)))
    }

    fn ifmap_name(&self) -> String {
        self.inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| format!("{}_in", self.name))
    }

    fn filter_name(&self) -> String {
        format!("{}_filter", self.name)
    }

    fn ofmap_name(&self) -> String {
        format!("{}_out", self.name)
    }

    fn shapes(&self) -> Vec<Vec<usize>> {
        self.inputs
            .iter()
            .map(|input| input.shape.clone())
            .chain(std::iter::once(self.output_shape.clone()))
            .collect()
    }

    fn unsupported_shapes(&self, reason: impl Into<String>) -> ClassifyError {
        ClassifyError::UnsupportedShapes {
            kind: self.kind.clone(),
            shapes: self.shapes(),
            reason: reason.into(),
        }
    }

    /// Number of elements in `shape`, or an unsupported-shapes error if it
    /// overflows.
    fn element_count(&self, shape: &[usize]) -> Result<usize, ClassifyError> {
        element_count(shape).map_err(|err| self.unsupported_shapes(err.to_string()))
    }

    fn attr_error(&self, attr: &str, error: impl Into<String>) -> ClassifyError {
        ClassifyError::AttrError {
            kind: self.kind.clone(),
            attr: attr.to_string(),
            error: error.into(),
        }
    }

    fn required_attr<T>(&self, attr: &str, value: Option<T>) -> Result<T, ClassifyError> {
        value.ok_or_else(|| self.attr_error(attr, "missing"))
    }
}

/// Errors when classifying a layer record.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifyError {
    /// No handler is registered for the operator kind.
    UnsupportedOperator { kind: OpKind },

    /// The handler does not support the combination of shapes, or the shapes
    /// are inconsistent with the layer's parameters.
    UnsupportedShapes {
        kind: OpKind,
        shapes: Vec<Vec<usize>>,
        reason: String,
    },

    /// An attribute is missing or has an invalid value.
    AttrError {
        kind: OpKind,
        attr: String,
        error: String,
    },
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedOperator { kind } => {
                write!(f, "unsupported operator kind \"{}\"", kind)
            }
            Self::UnsupportedShapes {
                kind,
                shapes,
                reason,
            } => write!(
                f,
                "unsupported shapes {:?} for operator \"{}\": {}",
                shapes, kind, reason
            ),
            Self::AttrError { kind, attr, error } => write!(
                f,
                "error in attribute \"{}\" of operator \"{}\": {}",
                attr, kind, error
            ),
        }
    }
}

impl Error for ClassifyError {}

/// Function which builds a description from a layer record.
pub type ClassifyFn = dyn Fn(&LayerInfo) -> Result<LayerDescription, ClassifyError> + Send + Sync;

/// Registry of handlers which convert layer records into descriptions.
///
/// New registries have no handlers. To create a registry with handlers for
/// all built-in operator kinds, use [`OpRegistry::with_all_ops`].
#[derive(Default)]
pub struct OpRegistry {
    handlers: FxHashMap<OpKind, Box<ClassifyFn>>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// Register the handler for an operator kind, replacing any existing
    /// handler.
    pub fn register<F>(&mut self, kind: OpKind, handler: F)
    where
        F: Fn(&LayerInfo) -> Result<LayerDescription, ClassifyError> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    /// Return true if a handler is registered for `kind`.
    pub fn supports(&self, kind: &OpKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Build the description of a layer using the registered handlers.
    pub fn classify(&self, info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
        let handler =
            self.handlers
                .get(&info.kind)
                .ok_or_else(|| ClassifyError::UnsupportedOperator {
                    kind: info.kind.clone(),
                })?;
        let desc = handler(info)?;
        log::debug!(
            "classified {} layer {} as {}",
            info.kind,
            info.name,
            desc.kind_name()
        );
        Ok(desc)
    }

    /// Create a new registry with all built-in operator kinds registered.
    pub fn with_all_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();

        macro_rules! register_op {
            ($kind:ident, $handler:expr) => {
                reg.register(OpKind::$kind, $handler)
            };
        }

        register_op!(CONV2D, classify_conv2d);
        register_op!(CONV_TRANSPOSE2D, classify_conv_transpose2d);
        register_op!(MAX_POOL2D, classify_max_pool2d);
        register_op!(ADAPTIVE_AVG_POOL2D, classify_adaptive_avg_pool2d);
        register_op!(LINEAR, classify_linear);
        register_op!(MATMUL, classify_matmul);
        register_op!(BMM, classify_matmul);
        register_op!(ATTENTION_PROJECTION, classify_attention_projection);
        register_op!(ADD, classify_binary_elementwise);
        register_op!(SUB, classify_binary_elementwise);
        register_op!(MUL, classify_binary_elementwise);
        register_op!(DIV, classify_binary_elementwise);
        register_op!(SOFTMAX, classify_softmax);
        register_op!(VIEW, classify_view);
        register_op!(RESHAPE, classify_view);
        register_op!(FLATTEN, classify_view);

        reg
    }
}

/// Return the `(kernel, stride, padding)` pairs of a convolution or pooling
/// layer.
///
/// The stride defaults to `default_stride` and padding to zero.
fn window_attrs(
    info: &LayerInfo,
    default_stride: impl FnOnce([usize; 2]) -> [usize; 2],
) -> Result<([usize; 2], [usize; 2], [usize; 2]), ClassifyError> {
    let kernel = info
        .required_attr("kernel_size", info.attrs.kernel_size)?
        .pair();
    let stride = info
        .attrs
        .stride
        .map(Size2::pair)
        .unwrap_or_else(|| default_stride(kernel));
    let padding = info.attrs.padding.map(Size2::pair).unwrap_or([0, 0]);

    if kernel.contains(&0) {
        return Err(info.attr_error("kernel_size", "must be positive"));
    }
    if stride.contains(&0) {
        return Err(info.attr_error("stride", "must be positive"));
    }
    Ok((kernel, stride, padding))
}

fn conv_desc(info: &LayerInfo) -> Result<ConvDesc, ClassifyError> {
    let [n, c, h, w] = info.nchw_input(0)?;
    let m = *info
        .output_shape
        .get(1)
        .ok_or_else(|| info.unsupported_shapes("output has no channel dimension"))?;
    let ([r, s], [h_stride, w_stride], [h_pad, w_pad]) = window_attrs(info, |_| [1, 1])?;
    let g = info.attrs.groups.unwrap_or(1);

    if g == 0 {
        return Err(info.attr_error("groups", "must be positive"));
    }
    if c % g != 0 || m % g != 0 {
        return Err(info.unsupported_shapes(format!(
            "{} groups do not divide {} input and {} output channels",
            g, c, m
        )));
    }

    Ok(ConvDesc {
        name: info.name.clone(),
        g,
        m,
        c,
        n,
        w,
        h,
        s,
        r,
        w_pad: DimPadding::symmetric(w_pad),
        h_pad: DimPadding::symmetric(h_pad),
        w_stride,
        h_stride,
        ifmap_name: info.ifmap_name(),
        filter_name: info.filter_name(),
        ofmap_name: info.ofmap_name(),
        transposed: false,
    })
}

fn classify_conv2d(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let desc = conv_desc(info)?;

    // Reject layers whose output would be empty.
    desc.p()
        .and_then(|_| desc.q())
        .map_err(|err| info.unsupported_shapes(err.to_string()))?;

    Ok(desc.into())
}

/// Model a transposed convolution as a convolution over its output.
///
/// The stored spatial size is the size of the transposed convolution's
/// output, so that the forward size formula recovers the input size.
fn classify_conv_transpose2d(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let mut desc = conv_desc(info)?;
    let out_h = transposed_output_size(desc.h, desc.r, desc.h_stride, desc.h_pad)
        .map_err(|err| info.unsupported_shapes(err.to_string()))?;
    let out_w = transposed_output_size(desc.w, desc.s, desc.w_stride, desc.w_pad)
        .map_err(|err| info.unsupported_shapes(err.to_string()))?;

    log::warn!(
        "layer {}: transposed convolution workloads are unreliable and may not match the layer's data accesses",
        info.name
    );

    desc.h = out_h;
    desc.w = out_w;
    desc.transposed = true;
    Ok(desc.into())
}

fn classify_max_pool2d(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let [n, c, h, w] = info.nchw_input(0)?;
    let ([r, s], [h_stride, w_stride], [h_pad, w_pad]) = window_attrs(info, |kernel| kernel)?;

    let desc = PoolDesc {
        name: info.name.clone(),
        w,
        h,
        c,
        n,
        s,
        r,
        w_pad: DimPadding::symmetric(w_pad),
        h_pad: DimPadding::symmetric(h_pad),
        w_stride,
        h_stride,
        ifmap_name: info.ifmap_name(),
        ofmap_name: info.ofmap_name(),
    };
    desc.p()
        .and_then(|_| desc.q())
        .map_err(|err| info.unsupported_shapes(err.to_string()))?;

    Ok(desc.into())
}

fn classify_adaptive_avg_pool2d(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let [n, c, h, w] = info.nchw_input(0)?;
    let [out_h, out_w] = match info.output_shape.as_slice() {
        [.., out_h, out_w] => [*out_h, *out_w],
        _ => return Err(info.unsupported_shapes("output has fewer than 2 dims")),
    };

    let mut desc = PoolDesc::adaptive(&info.name, n, c, [h, w], [out_h, out_w])
        .map_err(|err| info.unsupported_shapes(err.to_string()))?;
    desc.ifmap_name = info.ifmap_name();
    desc.ofmap_name = info.ofmap_name();

    Ok(desc.into())
}

/// Model a fully connected layer as a 1x1 convolution.
fn classify_linear(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let input = info.input(0)?;
    let Some((&in_size, leading)) = input.shape.split_last() else {
        return Err(info.unsupported_shapes("input is a scalar"));
    };
    let in_features = info.attrs.in_features.unwrap_or(in_size);
    let out_features = match info.attrs.out_features {
        Some(out_features) => out_features,
        None => *info
            .output_shape
            .last()
            .ok_or_else(|| info.unsupported_shapes("output is a scalar"))?,
    };
    if in_size != in_features {
        return Err(info.unsupported_shapes(format!(
            "last input dim {} does not match in_features {}",
            in_size, in_features
        )));
    }

    let batch_size = info.element_count(leading)?;
    let mut desc = ConvDesc::conv2d(
        &info.name,
        batch_size,
        in_features,
        out_features,
        [1, 1],
        [1, 1],
    );
    desc.ifmap_name = info.ifmap_name();
    desc.filter_name = info.filter_name();
    desc.ofmap_name = info.ofmap_name();

    Ok(desc.into())
}

/// Split a matrix shape `(..., rows, cols)` into its batch dims and matrix
/// size.
fn split_matrix(shape: &[usize]) -> Option<(&[usize], usize, usize)> {
    match shape {
        [batch @ .., rows, cols] => Some((batch, *rows, *cols)),
        _ => None,
    }
}

fn classify_matmul(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let lhs = info.input(0)?;
    let rhs = info.input(1)?;

    let (Some((lhs_batch, m, k)), Some((rhs_batch, rhs_k, n))) =
        (split_matrix(&lhs.shape), split_matrix(&rhs.shape))
    else {
        return Err(info.unsupported_shapes("inputs must have at least 2 dims"));
    };
    if k != rhs_k {
        return Err(info.unsupported_shapes(format!(
            "contraction sizes {} and {} differ",
            k, rhs_k
        )));
    }
    if lhs_batch != rhs_batch {
        return Err(info.unsupported_shapes("batch dims must have equal rank and sizes"));
    }

    Ok(MatmulDesc {
        name: info.name.clone(),
        m,
        n,
        k,
        extra_dims: Shape::from_slice(lhs_batch),
        ifmap1_name: lhs.name.clone(),
        ifmap2_name: rhs.name.clone(),
        ofmap_name: info.ofmap_name(),
    }
    .into())
}

/// Classify a projection `(..., m, k) x (k, n)` in an attention block, which
/// is modelled as a convolution.
fn classify_attention_projection(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let lhs = info.input(0)?;
    let rhs = info.input(1)?;

    let Some((batch, m, k)) = split_matrix(&lhs.shape) else {
        return Err(info.unsupported_shapes("input must have at least 2 dims"));
    };
    let &[rhs_k, n] = rhs.shape.as_slice() else {
        return Err(info.unsupported_shapes("weight must be 2D"));
    };
    if k != rhs_k {
        return Err(info.unsupported_shapes(format!(
            "contraction sizes {} and {} differ",
            k, rhs_k
        )));
    }

    let batch_size = info.element_count(batch)?;

    Ok(MatmulConvDesc {
        name: info.name.clone(),
        m,
        n,
        k,
        batch_size,
    }
    .into())
}

fn classify_binary_elementwise(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let lhs = info.input(0)?;
    let rhs = info.input(1)?;
    let rank = info.output_shape.len();
    if lhs.shape.len() > rank || rhs.shape.len() > rank {
        return Err(info.unsupported_shapes("input rank exceeds output rank"));
    }

    Ok(BinaryElementwiseDesc {
        name: info.name.clone(),
        ifmap1_shape: Shape::from_slice(&lhs.shape),
        ifmap2_shape: Shape::from_slice(&rhs.shape),
        ofmap_shape: Shape::from_slice(&info.output_shape),
        ifmap1_name: lhs.name.clone(),
        ifmap2_name: rhs.name.clone(),
        ofmap_name: info.ofmap_name(),
    }
    .into())
}

fn classify_softmax(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let input = info.input(0)?;
    let dim = info.attrs.dim.unwrap_or(-1);
    if input.shape.len() != info.output_shape.len() {
        return Err(info.unsupported_shapes("input and output ranks differ"));
    }
    resolve_axis(input.shape.len(), dim).map_err(|err| info.attr_error("dim", err.to_string()))?;

    Ok(SoftmaxDesc {
        name: info.name.clone(),
        ifmap_shape: Shape::from_slice(&input.shape),
        ofmap_shape: Shape::from_slice(&info.output_shape),
        ifmap_name: info.ifmap_name(),
        ofmap_name: info.ofmap_name(),
        dim,
    }
    .into())
}

fn classify_view(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
    let input = info.input(0)?;
    let in_count = info.element_count(&input.shape)?;
    let out_count = info.element_count(&info.output_shape)?;
    if in_count != out_count {
        return Err(info.unsupported_shapes(format!(
            "element counts differ ({} vs {})",
            in_count, out_count
        )));
    }

    Ok(ViewDesc {
        name: info.name.clone(),
        ifmap_shape: Shape::from_slice(&input.shape),
        ofmap_shape: Shape::from_slice(&info.output_shape),
        ifmap_name: info.ifmap_name(),
        ofmap_name: info.ofmap_name(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use loopspec_shape::DimPadding;
    use loopspec_testing::TestCases;
    use serde_json::json;

    use super::{Attrs, ClassifyError, LayerInfo, OpKind, OpRegistry, Size2, TensorInfo};
    use crate::ops::{LayerDescription, MatmulDesc, PoolDesc, Translate, TranslateMode};
    use crate::templates::BuiltinTemplates;

    fn layer(kind: OpKind, inputs: &[&[usize]], output_shape: &[usize], attrs: Attrs) -> LayerInfo {
        LayerInfo {
            name: "layer".to_string(),
            kind,
            inputs: inputs
                .iter()
                .enumerate()
                .map(|(i, shape)| TensorInfo {
                    name: format!("x{}", i),
                    shape: shape.to_vec(),
                })
                .collect(),
            output_shape: output_shape.to_vec(),
            attrs,
        }
    }

    fn classify(info: &LayerInfo) -> Result<LayerDescription, ClassifyError> {
        OpRegistry::with_all_ops().classify(info)
    }

    #[test]
    fn test_all_builtin_kinds_registered() {
        let reg = OpRegistry::with_all_ops();
        for kind in OpKind::BUILTIN {
            assert!(reg.supports(kind), "{} not registered", kind);
        }
        assert!(!OpRegistry::new().supports(&OpKind::CONV2D));
    }

    #[test]
    fn test_unsupported_operator() {
        let info = layer(OpKind::new("lstm"), &[&[1, 4]], &[1, 4], Attrs::default());
        assert_eq!(
            classify(&info),
            Err(ClassifyError::UnsupportedOperator {
                kind: OpKind::new("lstm")
            })
        );
        assert_eq!(
            classify(&info).err().unwrap().to_string(),
            "unsupported operator kind \"lstm\""
        );
    }

    #[test]
    fn test_register_custom_kind() {
        let mut reg = OpRegistry::new();
        reg.register(OpKind::new("gemm"), |info: &LayerInfo| {
            Ok(MatmulDesc::new(&info.name, 2, 3, 4).into())
        });
        let info = layer(OpKind::new("gemm"), &[], &[2, 3], Attrs::default());
        let desc = reg.classify(&info).unwrap();
        assert_eq!(
            desc,
            LayerDescription::from(MatmulDesc::new("layer", 2, 3, 4))
        );
    }

    #[test]
    fn test_conv2d() {
        let attrs = Attrs {
            kernel_size: Some(Size2::Scalar(3)),
            padding: Some(Size2::Scalar(1)),
            ..Attrs::default()
        };
        let info = layer(OpKind::CONV2D, &[&[1, 3, 32, 32]], &[1, 8, 32, 32], attrs);
        let LayerDescription::Conv(desc) = classify(&info).unwrap() else {
            panic!("expected conv description");
        };
        assert_eq!((desc.n, desc.c, desc.m, desc.g), (1, 3, 8, 1));
        assert_eq!((desc.h, desc.w, desc.r, desc.s), (32, 32, 3, 3));
        assert_eq!(desc.h_pad, DimPadding::symmetric(1));
        assert_eq!((desc.h_stride, desc.w_stride), (1, 1));
        assert_eq!(desc.ifmap_name, "x0");
        assert_eq!(desc.filter_name, "layer_filter");
        assert_eq!(desc.ofmap_name, "layer_out");
        assert!(!desc.transposed);

        let workload = desc
            .translate(TranslateMode::Legacy, BuiltinTemplates::shared())
            .unwrap();
        assert_eq!(workload.bound("P"), Some(32));
        assert_eq!(workload.bound("Q"), Some(32));
    }

    #[test]
    fn test_conv2d_errors() {
        #[derive(Debug)]
        struct Case {
            input: Vec<usize>,
            output: Vec<usize>,
            attrs: Attrs,
        }

        let kernel = |k| Attrs {
            kernel_size: Some(Size2::Scalar(k)),
            ..Attrs::default()
        };

        let cases = [
            // Missing kernel size
            Case {
                input: vec![1, 3, 8, 8],
                output: vec![1, 8, 6, 6],
                attrs: Attrs::default(),
            },
            // Input is not NCHW
            Case {
                input: vec![3, 8, 8],
                output: vec![8, 6, 6],
                attrs: kernel(3),
            },
            // Groups don't divide channels
            Case {
                input: vec![1, 4, 8, 8],
                output: vec![1, 8, 6, 6],
                attrs: Attrs {
                    groups: Some(3),
                    ..kernel(3)
                },
            },
            // Kernel larger than input
            Case {
                input: vec![1, 3, 2, 2],
                output: vec![1, 8, 1, 1],
                attrs: kernel(5),
            },
            // Zero stride
            Case {
                input: vec![1, 3, 8, 8],
                output: vec![1, 8, 6, 6],
                attrs: Attrs {
                    stride: Some(Size2::Scalar(0)),
                    ..kernel(3)
                },
            },
        ];

        cases.test_each(|case| {
            let info = layer(
                OpKind::CONV2D,
                &[case.input.as_slice()],
                &case.output,
                case.attrs.clone(),
            );
            let err = classify(&info).err().unwrap();
            assert!(matches!(
                err,
                ClassifyError::UnsupportedShapes { .. } | ClassifyError::AttrError { .. }
            ));
        });
    }

    #[test]
    fn test_conv_transpose2d() {
        let attrs = Attrs {
            kernel_size: Some(Size2::Scalar(3)),
            stride: Some(Size2::Scalar(2)),
            padding: Some(Size2::Scalar(1)),
            ..Attrs::default()
        };
        let info = layer(
            OpKind::CONV_TRANSPOSE2D,
            &[&[1, 16, 16, 16]],
            &[1, 8, 31, 31],
            attrs,
        );
        let LayerDescription::Conv(desc) = classify(&info).unwrap() else {
            panic!("expected conv description");
        };
        assert!(desc.transposed);
        assert_eq!((desc.h, desc.w), (31, 31));

        let workload = desc
            .translate(TranslateMode::Fused, BuiltinTemplates::shared())
            .unwrap();
        assert_eq!(workload.shape.name, "layer_transpose");
        assert_eq!(workload.bound("P"), Some(16));
    }

    #[test]
    fn test_max_pool2d() {
        #[derive(Debug)]
        struct Case {
            attrs: Attrs,
            expected_stride: (usize, usize),
            expected_kernel: (usize, usize),
            expected_pad: (usize, usize),
        }

        let cases = [
            // Stride defaults to kernel size
            Case {
                attrs: Attrs {
                    kernel_size: Some(Size2::Scalar(2)),
                    ..Attrs::default()
                },
                expected_stride: (2, 2),
                expected_kernel: (2, 2),
                expected_pad: (0, 0),
            },
            Case {
                attrs: Attrs {
                    kernel_size: Some(Size2::Pair([3, 2])),
                    stride: Some(Size2::Pair([1, 2])),
                    padding: Some(Size2::Pair([1, 0])),
                    ..Attrs::default()
                },
                expected_stride: (1, 2),
                expected_kernel: (3, 2),
                expected_pad: (1, 0),
            },
        ];

        cases.test_each(|case| {
            let info = layer(
                OpKind::MAX_POOL2D,
                &[&[1, 16, 8, 8]],
                &[1, 16, 4, 4],
                case.attrs.clone(),
            );
            let LayerDescription::Pool(desc) = classify(&info).unwrap() else {
                panic!("expected pool description");
            };
            assert_eq!((desc.h_stride, desc.w_stride), case.expected_stride);
            assert_eq!((desc.r, desc.s), case.expected_kernel);
            assert_eq!((desc.h_pad.start, desc.w_pad.start), case.expected_pad);
        });
    }

    #[test]
    fn test_adaptive_avg_pool2d() {
        let info = layer(
            OpKind::ADAPTIVE_AVG_POOL2D,
            &[&[1, 512, 7, 7]],
            &[1, 512, 1, 1],
            Attrs::default(),
        );
        let LayerDescription::Pool(desc) = classify(&info).unwrap() else {
            panic!("expected pool description");
        };
        assert_eq!((desc.r, desc.s), (7, 7));
        assert_eq!((desc.h_stride, desc.w_stride), (7, 7));
        assert_eq!(desc.h_pad, DimPadding::default());
        assert_eq!(desc.w_pad, DimPadding::default());

        let expected = {
            let mut desc = PoolDesc::adaptive("layer", 1, 512, [7, 7], [1, 1]).unwrap();
            desc.ifmap_name = "x0".to_string();
            desc
        };
        assert_eq!(desc, expected);

        let info = layer(
            OpKind::ADAPTIVE_AVG_POOL2D,
            &[&[1, 512, 7, 7]],
            &[1, 512, 0, 1],
            Attrs::default(),
        );
        assert!(classify(&info).is_err());
    }

    #[test]
    fn test_linear() {
        let attrs = Attrs {
            in_features: Some(768),
            out_features: Some(3072),
            ..Attrs::default()
        };
        let info = layer(OpKind::LINEAR, &[&[4, 128, 768]], &[4, 128, 3072], attrs.clone());
        let LayerDescription::Conv(desc) = classify(&info).unwrap() else {
            panic!("expected conv description");
        };
        assert_eq!((desc.n, desc.c, desc.m, desc.g), (512, 768, 3072, 1));
        assert_eq!((desc.h, desc.w, desc.r, desc.s), (1, 1, 1, 1));

        let workload = desc
            .translate(TranslateMode::Legacy, BuiltinTemplates::shared())
            .unwrap();
        assert_eq!(workload.bound("P"), Some(1));
        assert_eq!(workload.bound("N"), Some(512));

        let info = layer(OpKind::LINEAR, &[&[4, 512]], &[4, 3072], attrs);
        assert!(matches!(
            classify(&info),
            Err(ClassifyError::UnsupportedShapes { .. })
        ));
    }

    #[test]
    fn test_matmul() {
        #[derive(Debug)]
        struct Case {
            lhs: Vec<usize>,
            rhs: Vec<usize>,
            expected: Option<(usize, usize, usize, Vec<usize>)>,
        }

        let cases = [
            Case {
                lhs: vec![4, 8],
                rhs: vec![8, 16],
                expected: Some((4, 16, 8, vec![])),
            },
            Case {
                lhs: vec![2, 4, 8],
                rhs: vec![2, 8, 16],
                expected: Some((4, 16, 8, vec![2])),
            },
            // Mismatched batch dims
            Case {
                lhs: vec![2, 4, 8],
                rhs: vec![3, 8, 16],
                expected: None,
            },
            // Mismatched contraction sizes
            Case {
                lhs: vec![4, 8],
                rhs: vec![7, 16],
                expected: None,
            },
            // Mismatched ranks
            Case {
                lhs: vec![2, 4, 8],
                rhs: vec![8, 16],
                expected: None,
            },
            // Vector operand
            Case {
                lhs: vec![8],
                rhs: vec![8, 16],
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let info = layer(
                OpKind::MATMUL,
                &[case.lhs.as_slice(), case.rhs.as_slice()],
                &[],
                Attrs::default(),
            );
            match (classify(&info), &case.expected) {
                (Ok(LayerDescription::Matmul(desc)), Some((m, n, k, extra))) => {
                    assert_eq!((desc.m, desc.n, desc.k), (*m, *n, *k));
                    assert_eq!(desc.extra_dims.as_slice(), extra.as_slice());
                    assert_eq!(desc.ifmap1_name, "x0");
                    assert_eq!(desc.ifmap2_name, "x1");
                }
                (Err(ClassifyError::UnsupportedShapes { .. }), None) => {}
                (result, _) => panic!("unexpected result {:?}", result),
            }
        });
    }

    #[test]
    fn test_attention_projection() {
        let info = layer(
            OpKind::ATTENTION_PROJECTION,
            &[&[2, 3, 128, 64], &[64, 256]],
            &[2, 3, 128, 256],
            Attrs::default(),
        );
        let LayerDescription::MatmulConv(desc) = classify(&info).unwrap() else {
            panic!("expected matmul-conv description");
        };
        assert_eq!((desc.m, desc.n, desc.k, desc.batch_size), (128, 256, 64, 6));

        let info = layer(
            OpKind::ATTENTION_PROJECTION,
            &[&[128, 64], &[32, 256]],
            &[128, 256],
            Attrs::default(),
        );
        assert!(classify(&info).is_err());
    }

    #[test]
    fn test_binary_elementwise() {
        for kind in [OpKind::ADD, OpKind::SUB, OpKind::MUL, OpKind::DIV] {
            let info = layer(kind, &[&[2, 3, 4], &[4]], &[2, 3, 4], Attrs::default());
            let LayerDescription::BinaryElementwise(desc) = classify(&info).unwrap() else {
                panic!("expected elementwise description");
            };
            assert_eq!(desc.ifmap2_shape.as_slice(), &[4]);
            assert_eq!(desc.ofmap_name, "layer_out");
        }

        let info = layer(OpKind::ADD, &[&[2, 3, 4], &[4]], &[3, 4], Attrs::default());
        assert!(classify(&info).is_err());
    }

    #[test]
    fn test_softmax() {
        let info = layer(OpKind::SOFTMAX, &[&[8, 128]], &[8, 128], Attrs::default());
        let LayerDescription::Softmax(desc) = classify(&info).unwrap() else {
            panic!("expected softmax description");
        };
        assert_eq!(desc.dim, -1);

        let attrs = Attrs {
            dim: Some(2),
            ..Attrs::default()
        };
        let info = layer(OpKind::SOFTMAX, &[&[8, 128]], &[8, 128], attrs);
        assert!(matches!(
            classify(&info),
            Err(ClassifyError::AttrError { .. })
        ));
    }

    #[test]
    fn test_view() {
        for kind in [OpKind::VIEW, OpKind::RESHAPE, OpKind::FLATTEN] {
            let info = layer(kind, &[&[2, 3, 4]], &[6, 4], Attrs::default());
            assert!(matches!(classify(&info), Ok(LayerDescription::View(_))));
        }

        let info = layer(OpKind::VIEW, &[&[2, 3, 4]], &[5, 4], Attrs::default());
        assert!(matches!(
            classify(&info),
            Err(ClassifyError::UnsupportedShapes { .. })
        ));
    }

    #[test]
    fn test_element_count_overflow() {
        #[derive(Debug)]
        struct Case {
            kind: OpKind,
            inputs: Vec<Vec<usize>>,
            output_shape: Vec<usize>,
        }

        let cases = [
            // Both counts wrap to zero with unchecked multiplication.
            Case {
                kind: OpKind::VIEW,
                inputs: vec![vec![1 << 32, 1 << 32]],
                output_shape: vec![1 << 62, 8],
            },
            Case {
                kind: OpKind::LINEAR,
                inputs: vec![vec![1 << 32, 1 << 32, 8]],
                output_shape: vec![1 << 32, 1 << 32, 4],
            },
            Case {
                kind: OpKind::ATTENTION_PROJECTION,
                inputs: vec![vec![1 << 32, 1 << 32, 128, 64], vec![64, 256]],
                output_shape: vec![1 << 32, 1 << 32, 128, 256],
            },
        ];

        cases.test_each(|case| {
            let inputs: Vec<&[usize]> = case.inputs.iter().map(|shape| shape.as_slice()).collect();
            let info = layer(
                case.kind.clone(),
                &inputs,
                &case.output_shape,
                Attrs::default(),
            );
            match classify(&info) {
                Err(ClassifyError::UnsupportedShapes { reason, .. }) => {
                    assert!(reason.ends_with("overflows"), "reason: {}", reason);
                }
                other => panic!("expected unsupported shapes, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_parse_layer_info() {
        let info: LayerInfo = serde_json::from_value(json!({
            "name": "features.0",
            "kind": "conv2d",
            "inputs": [{"name": "x", "shape": [1, 3, 224, 224]}],
            "output_shape": [1, 64, 112, 112],
            "attrs": {"kernel_size": [7, 7], "stride": 2, "padding": 3}
        }))
        .unwrap();

        assert_eq!(info.kind, OpKind::CONV2D);
        assert_eq!(info.attrs.kernel_size, Some(Size2::Pair([7, 7])));
        assert_eq!(info.attrs.stride.map(Size2::pair), Some([2, 2]));
        assert_eq!(info.attrs.groups, None);

        let LayerDescription::Conv(desc) = classify(&info).unwrap() else {
            panic!("expected conv description");
        };
        let workload = desc
            .translate(TranslateMode::Legacy, BuiltinTemplates::shared())
            .unwrap();
        assert_eq!(workload.bound("P"), Some(112));
    }
}
