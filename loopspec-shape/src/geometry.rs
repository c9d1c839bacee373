//! Size formulas for convolution, pooling and layout operators.
//!
//! All inputs are concrete, already-resolved extents. Functions return an
//! error rather than a wrapped-around or truncated value when a formula
//! would produce a negative or otherwise invalid size.

use std::fmt;

use smallvec::SmallVec;

/// Shape of a tensor as a list of dimension sizes.
pub type Shape = SmallVec<[usize; 4]>;

/// Errors produced by size formulas.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryError {
    /// A stride of zero was specified.
    ZeroStride,

    /// The (padded) input is smaller than the kernel, so the output would be
    /// empty or negative in size.
    KernelTooLarge {
        in_size: usize,
        kernel_size: usize,
        padding: usize,
    },

    /// The padding removed more elements than the transposed convolution
    /// produces.
    PaddingTooLarge { padding: usize, unpadded_size: usize },

    /// An adaptive pooling output extent was zero or larger than the input.
    InvalidAdaptiveSize { in_size: usize, out_size: usize },

    /// A shape has more dimensions than the rank it must be broadcast to.
    RankTooLarge { rank: usize, target_rank: usize },

    /// An axis index is out of range for a tensor of the given rank.
    AxisOutOfRange { axis: i32, ndim: usize },

    /// The element count or a stride of a shape does not fit in the size
    /// type used for it.
    SizeOverflow { shape: Vec<usize> },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroStride => write!(f, "stride must be non-zero"),
            Self::KernelTooLarge {
                in_size,
                kernel_size,
                padding,
            } => write!(
                f,
                "kernel size {} exceeds input size {} with padding {}",
                kernel_size, in_size, padding
            ),
            Self::PaddingTooLarge {
                padding,
                unpadded_size,
            } => write!(
                f,
                "padding {} exceeds transposed output size {}",
                padding, unpadded_size
            ),
            Self::InvalidAdaptiveSize { in_size, out_size } => write!(
                f,
                "cannot adaptively pool input size {} to output size {}",
                in_size, out_size
            ),
            Self::RankTooLarge { rank, target_rank } => write!(
                f,
                "shape of rank {} cannot be broadcast to rank {}",
                rank, target_rank
            ),
            Self::AxisOutOfRange { axis, ndim } => {
                write!(f, "axis {} is out of range for rank {}", axis, ndim)
            }
            Self::SizeOverflow { shape } => {
                write!(f, "size of shape {:?} overflows", shape)
            }
        }
    }
}

impl std::error::Error for GeometryError {}

/// Padding for a single spatial dimension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DimPadding {
    pub start: usize,
    pub end: usize,
}

impl DimPadding {
    /// Padding with the same amount at the start and end.
    pub fn symmetric(pad: usize) -> Self {
        DimPadding {
            start: pad,
            end: pad,
        }
    }

    /// Total padding added to the dimension.
    pub fn total(&self) -> usize {
        self.start + self.end
    }
}

/// Return the output size for a spatial dimension of a convolution or
/// pooling operation.
///
/// This is `floor((in_size + pad_start + pad_end - kernel_size) / stride) + 1`,
/// which for symmetric padding is the familiar
/// `floor((in - kernel + 2 * pad) / stride) + 1`.
pub fn output_size(
    in_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: DimPadding,
) -> Result<usize, GeometryError> {
    if stride == 0 {
        return Err(GeometryError::ZeroStride);
    }
    let padded = in_size + padding.total();
    let span = padded
        .checked_sub(kernel_size)
        .ok_or(GeometryError::KernelTooLarge {
            in_size,
            kernel_size,
            padding: padding.total(),
        })?;
    Ok(span / stride + 1)
}

/// Return the output size for a spatial dimension of a transposed
/// convolution.
///
/// This is `(in_size - 1) * stride - pad_start - pad_end + (kernel_size - 1) + 1`,
/// ie. the PyTorch formula with a dilation of 1 and no output padding.
pub fn transposed_output_size(
    in_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: DimPadding,
) -> Result<usize, GeometryError> {
    if stride == 0 {
        return Err(GeometryError::ZeroStride);
    }
    if in_size == 0 || kernel_size == 0 {
        return Err(GeometryError::KernelTooLarge {
            in_size,
            kernel_size,
            padding: padding.total(),
        });
    }
    let unpadded_size = (in_size - 1) * stride + (kernel_size - 1) + 1;
    unpadded_size
        .checked_sub(padding.total())
        .filter(|size| *size > 0)
        .ok_or(GeometryError::PaddingTooLarge {
            padding: padding.total(),
            unpadded_size,
        })
}

/// Kernel size and stride of an adaptive pooling window along one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdaptiveWindow {
    pub kernel_size: usize,
    pub stride: usize,
}

/// Derive an equivalent fixed pooling window for an adaptive pooling
/// operation which maps `in_size` elements to `out_size` elements without
/// padding.
///
/// `stride = floor(in_size / out_size)` and
/// `kernel_size = in_size - (out_size - 1) * stride`.
pub fn adaptive_window(in_size: usize, out_size: usize) -> Result<AdaptiveWindow, GeometryError> {
    if out_size == 0 || out_size > in_size {
        return Err(GeometryError::InvalidAdaptiveSize { in_size, out_size });
    }
    let stride = in_size / out_size;
    let kernel_size = in_size - (out_size - 1) * stride;
    Ok(AdaptiveWindow {
        kernel_size,
        stride,
    })
}

/// Left-pad `shape` with 1s until it has `rank` dimensions.
///
/// Fails if `shape` already has more than `rank` dimensions.
pub fn pad_to_rank(shape: &[usize], rank: usize) -> Result<Shape, GeometryError> {
    let n_pad = rank
        .checked_sub(shape.len())
        .ok_or(GeometryError::RankTooLarge {
            rank: shape.len(),
            target_rank: rank,
        })?;
    Ok(std::iter::repeat_n(1, n_pad)
        .chain(shape.iter().copied())
        .collect())
}

/// Return the number of elements in a tensor of the given shape.
///
/// A scalar (empty shape) has one element. Fails if the count overflows
/// `usize`.
pub fn element_count(shape: &[usize]) -> Result<usize, GeometryError> {
    shape
        .iter()
        .try_fold(1usize, |count, &size| count.checked_mul(size))
        .ok_or_else(|| GeometryError::SizeOverflow {
            shape: shape.to_vec(),
        })
}

/// Return the strides of a contiguous row-major tensor with the given shape,
/// ie. the last dimension varies fastest.
///
/// Fails if a stride overflows `usize`.
pub fn row_major_strides(shape: &[usize]) -> Result<Shape, GeometryError> {
    let mut strides: Shape = SmallVec::from_elem(1, shape.len());
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].checked_mul(shape[i + 1]).ok_or_else(|| {
            GeometryError::SizeOverflow {
                shape: shape.to_vec(),
            }
        })?;
    }
    Ok(strides)
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// Negative axis values count backwards from the last dimension.
pub fn resolve_axis(ndim: usize, axis: i32) -> Result<usize, GeometryError> {
    let len = ndim.min(i32::MAX as usize) as i32;
    if axis < -len || axis >= len {
        return Err(GeometryError::AxisOutOfRange { axis, ndim });
    }
    let resolved = if axis >= 0 { axis } else { len + axis };
    Ok(resolved as usize)
}
