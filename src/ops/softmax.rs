use loopspec_shape::geometry::resolve_axis;
use loopspec_shape::{DimNameGen, Shape};

use crate::ops::{template_data_spaces, Translate, TranslateError, TranslateMode};
use crate::templates::{ProblemTemplate, TemplateProvider};
use crate::workload::{Projection, Workload};

/// Description of a softmax over one axis.
///
/// The workload uses one dimension per input axis plus an extra dimension
/// which replaces the softmax axis in the output's projection, so that every
/// output element along the axis depends on every input element along it.
#[derive(Clone, Debug, PartialEq)]
pub struct SoftmaxDesc {
    pub name: String,
    pub ifmap_shape: Shape,
    pub ofmap_shape: Shape,
    pub ifmap_name: String,
    pub ofmap_name: String,

    /// Softmax axis. Negative values count back from the last axis.
    pub dim: i32,
}

impl SoftmaxDesc {
    pub fn new(name: &str, shape: &[usize], dim: i32) -> Self {
        SoftmaxDesc {
            name: name.to_string(),
            ifmap_shape: Shape::from_slice(shape),
            ofmap_shape: Shape::from_slice(shape),
            ifmap_name: format!("{}_in", name),
            ofmap_name: format!("{}_out", name),
            dim,
        }
    }
}

impl Translate for SoftmaxDesc {
    fn translate(
        &self,
        _mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        let shapes = [self.ifmap_shape.as_slice(), self.ofmap_shape.as_slice()];
        let rank = self.ifmap_shape.len();
        if self.ofmap_shape.len() != rank {
            return Err(TranslateError::incompatible(
                "Softmax",
                &shapes,
                "input and output ranks differ",
            ));
        }
        let axis = resolve_axis(rank, self.dim)
            .map_err(|err| TranslateError::incompatible("Softmax", &shapes, err.to_string()))?;

        let dims = DimNameGen::new().gen_names(rank + 1);
        let (axis_dims, reduce_dim) = dims.split_at(rank);

        let mut workload = templates.template(ProblemTemplate::Softmax)?;
        let [input, output] =
            template_data_spaces(ProblemTemplate::Softmax, &workload, ["Input", "Output"])?;

        let input = &mut workload.shape.data_spaces[input];
        input.name = self.ifmap_name.clone();
        input.projection = Projection::identity(axis_dims);

        let mut out_dims = axis_dims.to_vec();
        out_dims[axis] = reduce_dim[0].clone();
        let output = &mut workload.shape.data_spaces[output];
        output.name = self.ofmap_name.clone();
        output.projection = Projection::identity(&out_dims);

        workload.shape.name = self.name.clone();
        workload.shape.dimensions = dims.clone();

        for (dim, &size) in axis_dims.iter().zip(&self.ifmap_shape) {
            workload.set_bound(dim, size);
        }
        workload.set_bound(&reduce_dim[0], self.ofmap_shape[axis]);

        Ok(workload)
    }
}
