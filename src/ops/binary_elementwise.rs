use loopspec_shape::geometry::pad_to_rank;
use loopspec_shape::{DimNameGen, Shape};

use crate::ops::{set_identity_projections, Translate, TranslateError, TranslateMode};
use crate::templates::{ProblemTemplate, TemplateProvider};
use crate::workload::Workload;

/// Description of an elementwise binary operator such as `Add` or `Mul`.
///
/// Inputs with lower rank than the output are broadcast by prepending
/// dimensions of size 1. Broadcasting is otherwise not modelled, so the
/// padded input shapes must have the same rank as the output.
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryElementwiseDesc {
    pub name: String,
    pub ifmap1_shape: Shape,
    pub ifmap2_shape: Shape,
    pub ofmap_shape: Shape,
    pub ifmap1_name: String,
    pub ifmap2_name: String,
    pub ofmap_name: String,
}

impl BinaryElementwiseDesc {
    pub fn new(name: &str, lhs: &[usize], rhs: &[usize], out: &[usize]) -> Self {
        BinaryElementwiseDesc {
            name: name.to_string(),
            ifmap1_shape: Shape::from_slice(lhs),
            ifmap2_shape: Shape::from_slice(rhs),
            ofmap_shape: Shape::from_slice(out),
            ifmap1_name: format!("{}_lhs", name),
            ifmap2_name: format!("{}_rhs", name),
            ofmap_name: format!("{}_out", name),
        }
    }

    fn padded_inputs(&self) -> Result<(Shape, Shape), TranslateError> {
        let rank = self.ofmap_shape.len();
        let pad = |shape: &[usize]| {
            pad_to_rank(shape, rank).map_err(|err| {
                TranslateError::incompatible(
                    "BinaryElementwise",
                    &[
                        self.ifmap1_shape.as_slice(),
                        self.ifmap2_shape.as_slice(),
                        self.ofmap_shape.as_slice(),
                    ],
                    err.to_string(),
                )
            })
        };
        Ok((
            pad(self.ifmap1_shape.as_slice())?,
            pad(self.ifmap2_shape.as_slice())?,
        ))
    }
}

impl Translate for BinaryElementwiseDesc {
    fn translate(
        &self,
        _mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        let (lhs, _rhs) = self.padded_inputs()?;

        let dims = DimNameGen::new().gen_names(self.ofmap_shape.len());

        let mut workload = templates.template(ProblemTemplate::BinaryElementwise)?;
        set_identity_projections(&mut workload, &dims);
        workload.shape.dimensions = dims.clone();

        // Bounds follow the first input, so a broadcast first operand yields
        // size-1 dimensions.
        for (dim, &size) in dims.iter().zip(&lhs) {
            workload.set_bound(dim, size);
        }

        // A degenerate op over single elements is flagged for the mapper.
        workload.shape.name = if lhs.iter().all(|&size| size == 1) {
            format!("{}_exhaustive", self.name)
        } else {
            self.name.clone()
        };

        Ok(workload)
    }
}
