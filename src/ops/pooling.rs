use loopspec_shape::geometry::{adaptive_window, output_size};
use loopspec_shape::{DimPadding, GeometryError};

use crate::ops::{Translate, TranslateError, TranslateMode};
use crate::templates::{ProblemTemplate, TemplateProvider};
use crate::workload::Workload;

/// Description of a 2D pooling layer.
///
/// Adaptive pooling is modelled as a fixed pooling window whose kernel size
/// and stride are derived from the input and output sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolDesc {
    pub name: String,

    /// Input width.
    pub w: usize,
    /// Input height.
    pub h: usize,
    /// Channels.
    pub c: usize,
    /// Batch size.
    pub n: usize,

    /// Kernel width.
    pub s: usize,
    /// Kernel height.
    pub r: usize,

    pub w_pad: DimPadding,
    pub h_pad: DimPadding,
    pub w_stride: usize,
    pub h_stride: usize,

    pub ifmap_name: String,
    pub ofmap_name: String,
}

impl PoolDesc {
    /// Create a description of an unpadded pooling layer with input
    /// `(n, c, h, w)` whose stride equals its kernel size `[r, s]`.
    pub fn new(name: &str, n: usize, c: usize, [h, w]: [usize; 2], [r, s]: [usize; 2]) -> Self {
        PoolDesc {
            name: name.to_string(),
            w,
            h,
            c,
            n,
            s,
            r,
            w_pad: DimPadding::default(),
            h_pad: DimPadding::default(),
            w_stride: s,
            h_stride: r,
            ifmap_name: format!("{}_in", name),
            ofmap_name: format!("{}_out", name),
        }
    }

    /// Create a description of an adaptive pooling layer which maps an
    /// `[h, w]` input to an `[out_h, out_w]` output.
    pub fn adaptive(
        name: &str,
        n: usize,
        c: usize,
        [h, w]: [usize; 2],
        [out_h, out_w]: [usize; 2],
    ) -> Result<Self, GeometryError> {
        let h_window = adaptive_window(h, out_h)?;
        let w_window = adaptive_window(w, out_w)?;
        let mut desc = PoolDesc::new(
            name,
            n,
            c,
            [h, w],
            [h_window.kernel_size, w_window.kernel_size],
        );
        desc.h_stride = h_window.stride;
        desc.w_stride = w_window.stride;
        Ok(desc)
    }

    /// Output height.
    pub fn p(&self) -> Result<usize, TranslateError> {
        output_size(self.h, self.r, self.h_stride, self.h_pad)
            .map_err(TranslateError::geometry("Pool"))
    }

    /// Output width.
    pub fn q(&self) -> Result<usize, TranslateError> {
        output_size(self.w, self.s, self.w_stride, self.w_pad)
            .map_err(TranslateError::geometry("Pool"))
    }
}

impl Translate for PoolDesc {
    fn translate(
        &self,
        _mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        let p = self.p()?;
        let q = self.q()?;

        let mut workload = templates.template(ProblemTemplate::Pool)?;
        workload.shape.name = self.name.clone();
        for (dim, size) in [
            ("R", self.r),
            ("S", self.s),
            ("P", p),
            ("Q", q),
            ("C", self.c),
            ("N", self.n),
            ("Wstride", self.w_stride),
            ("Hstride", self.h_stride),
        ] {
            workload.set_bound(dim, size);
        }
        Ok(workload)
    }
}
