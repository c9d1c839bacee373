use loopspec_shape::{DimNameGen, Shape};

use crate::ops::{
    affine_axes_mut, template_data_spaces, Translate, TranslateError, TranslateMode,
};
use crate::templates::{ProblemTemplate, TemplateProvider};
use crate::workload::{Term, Workload};

/// Description of a matrix multiplication, optionally batched.
///
/// Computes `(..., m, k) x (..., k, n) -> (..., m, n)` where the leading
/// `extra_dims` are shared by all operands.
#[derive(Clone, Debug, PartialEq)]
pub struct MatmulDesc {
    pub name: String,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub extra_dims: Shape,
    pub ifmap1_name: String,
    pub ifmap2_name: String,
    pub ofmap_name: String,
}

impl MatmulDesc {
    pub fn new(name: &str, m: usize, n: usize, k: usize) -> Self {
        MatmulDesc {
            name: name.to_string(),
            m,
            n,
            k,
            extra_dims: Shape::new(),
            ifmap1_name: format!("{}_lhs", name),
            ifmap2_name: format!("{}_rhs", name),
            ofmap_name: format!("{}_out", name),
        }
    }
}

impl Translate for MatmulDesc {
    fn translate(
        &self,
        _mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        let mut workload = templates.template(ProblemTemplate::Matmul)?;

        let base_dims: Vec<&str> = workload
            .shape
            .dimensions
            .iter()
            .map(|d| d.as_str())
            .collect();
        let extra_names = DimNameGen::excluding(&base_dims).gen_names(self.extra_dims.len());

        let operands = template_data_spaces(
            ProblemTemplate::Matmul,
            &workload,
            ["Input1", "Input2", "Outputs"],
        )?;
        let names = [&self.ifmap1_name, &self.ifmap2_name, &self.ofmap_name];
        for (index, name) in operands.into_iter().zip(names) {
            workload.shape.data_spaces[index].name = name.clone();
        }

        for ds in workload.shape.data_spaces.iter_mut() {
            let axes = affine_axes_mut(ProblemTemplate::Matmul, &mut ds.projection)?;
            axes.splice(0..0, extra_names.iter().map(|d| vec![Term::dim(d)]));
        }

        workload
            .shape
            .dimensions
            .splice(0..0, extra_names.iter().cloned());
        workload.shape.name = self.name.clone();

        workload.set_bound("K", self.k);
        workload.set_bound("M", self.m);
        workload.set_bound("N", self.n);
        for (dim, &size) in extra_names.iter().zip(&self.extra_dims) {
            workload.set_bound(dim, size);
        }

        Ok(workload)
    }
}

/// Description of a matrix multiplication `(batch, m, k) x (k, n)` modelled
/// as a convolution.
///
/// The contraction runs over the kernel width `S`, rows map to the output
/// height `P`, columns to the output channels `M` and the batch to `N`.
#[derive(Clone, Debug, PartialEq)]
pub struct MatmulConvDesc {
    pub name: String,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub batch_size: usize,
}

impl Translate for MatmulConvDesc {
    fn translate(
        &self,
        _mode: TranslateMode,
        templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        let mut workload = templates.template(ProblemTemplate::Convolution)?;
        workload.shape.name = self.name.clone();
        for (dim, size) in [
            ("R", 1),
            ("S", self.k),
            ("P", self.m),
            ("Q", 1),
            ("C", 1),
            ("M", self.n),
            ("N", self.batch_size),
            ("Wstride", 1),
            ("Hstride", 1),
        ] {
            workload.set_bound(dim, size);
        }
        Ok(workload)
    }
}

#[cfg(test)]
mod tests {
    use loopspec_shape::Shape;
    use loopspec_testing::strings;

    use super::{MatmulConvDesc, MatmulDesc};
    use crate::ops::{Translate, TranslateMode};
    use crate::templates::BuiltinTemplates;
    use crate::workload::{Projection, Term};

    #[test]
    fn test_matmul() {
        let desc = MatmulDesc::new("fc", 4, 16, 8);
        let workload = desc
            .translate(TranslateMode::Legacy, BuiltinTemplates::shared())
            .unwrap();

        assert_eq!(workload.shape.name, "fc");
        assert_eq!(workload.shape.dimensions, ["M", "N", "K"]);
        assert_eq!(workload.bound("M"), Some(4));
        assert_eq!(workload.bound("N"), Some(16));
        assert_eq!(workload.bound("K"), Some(8));

        let names: Vec<_> = workload
            .shape
            .data_spaces
            .iter()
            .map(|ds| ds.name.clone())
            .collect();
        assert_eq!(names, strings(&["fc_lhs", "fc_rhs", "fc_out"]));
        assert!(workload.data_space("fc_out").unwrap().read_write);
    }

    #[test]
    fn test_batched_matmul() {
        let mut desc = MatmulDesc::new("bmm", 4, 16, 8);
        desc.extra_dims = Shape::from_slice(&[2, 12]);

        let workload = desc
            .translate(TranslateMode::Fused, BuiltinTemplates::shared())
            .unwrap();

        assert_eq!(workload.shape.dimensions, ["A", "B", "M", "N", "K"]);
        assert_eq!(workload.bound("A"), Some(2));
        assert_eq!(workload.bound("B"), Some(12));
        assert_eq!(workload.bounds().unwrap().len(), 5);

        let lhs = workload.data_space("bmm_lhs").unwrap();
        assert_eq!(
            lhs.projection,
            Projection::Affine(vec![
                vec![Term::dim("A")],
                vec![Term::dim("B")],
                vec![Term::dim("M")],
                vec![Term::dim("K")],
            ])
        );
        let out = workload.data_space("bmm_out").unwrap();
        assert_eq!(out.projection.axes().unwrap().len(), 4);
    }

    #[test]
    fn test_extra_dims_avoid_base_names() {
        let mut desc = MatmulDesc::new("bmm", 2, 2, 2);
        desc.extra_dims = Shape::from_elem(1, 14);

        let workload = desc
            .translate(TranslateMode::Legacy, BuiltinTemplates::shared())
            .unwrap();
        let dims = &workload.shape.dimensions;
        assert_eq!(dims.len(), 17);
        for base in ["M", "N", "K"] {
            assert_eq!(dims.iter().filter(|d| *d == base).count(), 1);
        }
    }

    #[test]
    fn test_matmul_as_conv() {
        let desc = MatmulConvDesc {
            name: "q_proj".to_string(),
            m: 128,
            n: 768,
            k: 768,
            batch_size: 4,
        };
        let workload = desc
            .translate(TranslateMode::Legacy, BuiltinTemplates::shared())
            .unwrap();

        assert_eq!(workload.shape.name, "q_proj");
        for (dim, size) in [
            ("R", 1),
            ("S", 768),
            ("P", 128),
            ("Q", 1),
            ("C", 1),
            ("M", 768),
            ("N", 4),
            ("Wstride", 1),
            ("Hstride", 1),
        ] {
            assert_eq!(workload.bound(dim), Some(size), "bound of {}", dim);
        }
        assert!(workload.data_space("Weights").is_some());
    }
}
