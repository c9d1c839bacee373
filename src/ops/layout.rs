use loopspec_shape::geometry::{element_count, row_major_strides};
use loopspec_shape::{DimNameGen, GeometryError, Shape, SymExpr};

use crate::ops::{Translate, TranslateError, TranslateMode};
use crate::templates::TemplateProvider;
use crate::workload::{DataSpace, Instance, ProblemShape, Projection, Workload};

/// Description of a reshape (`view`, `reshape`, `flatten`) between two
/// contiguous row-major layouts with the same number of elements.
///
/// The input and output layouts need not share any dimension structure, so
/// the input coordinates are expressed as non-affine functions of the output
/// coordinates. This is only supported in [`TranslateMode::Fused`].
#[derive(Clone, Debug, PartialEq)]
pub struct ViewDesc {
    pub name: String,
    pub ifmap_shape: Shape,
    pub ofmap_shape: Shape,
    pub ifmap_name: String,
    pub ofmap_name: String,
}

impl ViewDesc {
    pub fn new(name: &str, ifmap_shape: &[usize], ofmap_shape: &[usize]) -> Self {
        ViewDesc {
            name: name.to_string(),
            ifmap_shape: Shape::from_slice(ifmap_shape),
            ofmap_shape: Shape::from_slice(ofmap_shape),
            ifmap_name: format!("{}_in", name),
            ofmap_name: format!("{}_out", name),
        }
    }

    /// Return expressions for the coordinates of each input axis in terms of
    /// the output dimensions `dims`.
    ///
    /// The output coordinate is linearized as `sum(dim_i * stride_i)` and
    /// input axis `j` is recovered as `floor(linear / stride_j) % size_j`.
    ///
    /// Fails if a stride or extent of either layout does not fit in the
    /// expression value type.
    pub fn input_coords(&self, dims: &[String]) -> Result<Vec<SymExpr>, GeometryError> {
        let out_strides = row_major_strides(&self.ofmap_shape)?;
        let terms = dims
            .iter()
            .zip(out_strides)
            .map(|(dim, stride)| Ok(SymExpr::var(dim) * size_expr(stride, &self.ofmap_shape)?))
            .collect::<Result<Vec<_>, GeometryError>>()?;
        let linear = terms
            .into_iter()
            .reduce(|acc, term| acc + term)
            .unwrap_or(SymExpr::Value(0))
            .simplify();

        let in_strides = row_major_strides(&self.ifmap_shape)?;
        self.ifmap_shape
            .iter()
            .zip(in_strides)
            .map(|(&size, stride)| {
                let stride = size_expr(stride, &self.ifmap_shape)?;
                let size = size_expr(size, &self.ifmap_shape)?;
                Ok((linear.clone().floor_div(stride) % size).simplify())
            })
            .collect()
    }
}

/// Convert a stride or extent of `shape` to an expression.
fn size_expr(size: usize, shape: &[usize]) -> Result<SymExpr, GeometryError> {
    SymExpr::try_from(size).map_err(|_| GeometryError::SizeOverflow {
        shape: shape.to_vec(),
    })
}

/// Format expressions as a projection list such as `[ A, floor(A/2)%3 ]`.
fn expr_list<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    let items: Vec<_> = items.into_iter().map(|item| item.to_string()).collect();
    format!("[ {} ]", items.join(", "))
}

impl Translate for ViewDesc {
    fn translate(
        &self,
        mode: TranslateMode,
        _templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        if mode != TranslateMode::Fused {
            return Err(TranslateError::UnsupportedMode { op: "View", mode });
        }

        let in_count =
            element_count(&self.ifmap_shape).map_err(TranslateError::geometry("View"))?;
        let out_count =
            element_count(&self.ofmap_shape).map_err(TranslateError::geometry("View"))?;
        if in_count != out_count {
            return Err(TranslateError::incompatible(
                "View",
                &[self.ifmap_shape.as_slice(), self.ofmap_shape.as_slice()],
                format!("element counts differ ({} vs {})", in_count, out_count),
            ));
        }

        let dims = DimNameGen::new().gen_names(self.ofmap_shape.len());
        let in_coords = self
            .input_coords(&dims)
            .map_err(TranslateError::geometry("View"))?;

        let constraint = dims
            .iter()
            .zip(&self.ofmap_shape)
            .map(|(dim, size)| format!("0 <= {} < {}", dim, size))
            .collect::<Vec<_>>()
            .join(" and ");

        let shape = ProblemShape {
            name: self.name.clone(),
            dimensions: dims.clone(),
            coefficients: Vec::new(),
            data_spaces: vec![
                DataSpace {
                    name: self.ifmap_name.clone(),
                    projection: Projection::Expr(expr_list(&in_coords)),
                    read_write: false,
                },
                DataSpace {
                    name: self.ofmap_name.clone(),
                    projection: Projection::Expr(expr_list(&dims)),
                    read_write: true,
                },
            ],
        };

        Ok(Workload {
            shape,
            instance: Instance::Constraint(constraint),
        })
    }
}
