use loopspec_shape::geometry::output_size;
use loopspec_shape::DimPadding;

use crate::ops::{Translate, TranslateError, TranslateMode};
use crate::templates::TemplateProvider;
use crate::workload::{
    Coefficient, DataSpace, Instance, ProblemShape, Projection, Term, Workload,
};

/// Description of a 2D convolution.
///
/// Transposed convolutions and linear layers are also modelled with this
/// type. For a transposed convolution `h` and `w` hold the size of the
/// transposed convolution's output and `transposed` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvDesc {
    pub name: String,

    /// Number of groups.
    pub g: usize,
    /// Output channels.
    pub m: usize,
    /// Input channels.
    pub c: usize,
    /// Batch size.
    pub n: usize,

    /// Input width.
    pub w: usize,
    /// Input height.
    pub h: usize,

    /// Kernel width.
    pub s: usize,
    /// Kernel height.
    pub r: usize,

    pub w_pad: DimPadding,
    pub h_pad: DimPadding,
    pub w_stride: usize,
    pub h_stride: usize,

    pub ifmap_name: String,
    pub filter_name: String,
    pub ofmap_name: String,

    pub transposed: bool,
}

impl ConvDesc {
    /// Create a description of an ungrouped, unpadded, unit-stride
    /// convolution with input `(n, c, h, w)` and kernel size `[r, s]`.
    pub fn conv2d(
        name: &str,
        n: usize,
        c: usize,
        m: usize,
        [h, w]: [usize; 2],
        [r, s]: [usize; 2],
    ) -> ConvDesc {
        ConvDesc {
            name: name.to_string(),
            g: 1,
            m,
            c,
            n,
            w,
            h,
            s,
            r,
            w_pad: DimPadding::default(),
            h_pad: DimPadding::default(),
            w_stride: 1,
            h_stride: 1,
            ifmap_name: format!("{}_in", name),
            filter_name: format!("{}_filter", name),
            ofmap_name: format!("{}_out", name),
            transposed: false,
        }
    }

    /// Output height.
    pub fn p(&self) -> Result<usize, TranslateError> {
        output_size(self.h, self.r, self.h_stride, self.h_pad)
            .map_err(TranslateError::geometry(self.op_name()))
    }

    /// Output width.
    pub fn q(&self) -> Result<usize, TranslateError> {
        output_size(self.w, self.s, self.w_stride, self.w_pad)
            .map_err(TranslateError::geometry(self.op_name()))
    }

    /// Name of the generated workload.
    pub fn workload_name(&self) -> String {
        if self.transposed {
            format!("{}_transpose", self.name)
        } else {
            self.name.clone()
        }
    }

    fn op_name(&self) -> &'static str {
        if self.transposed {
            "ConvTranspose"
        } else {
            "Conv"
        }
    }

    fn check_groups(&self) -> Result<(), TranslateError> {
        let shapes: [&[usize]; 2] = [&[self.n, self.c, self.h, self.w], &[self.m, self.r, self.s]];
        if self.g == 0 {
            return Err(TranslateError::incompatible(
                self.op_name(),
                &shapes,
                "group count must be positive",
            ));
        }
        if self.c % self.g != 0 || self.m % self.g != 0 {
            return Err(TranslateError::incompatible(
                self.op_name(),
                &shapes,
                format!(
                    "{} groups do not divide {} input and {} output channels",
                    self.g, self.c, self.m
                ),
            ));
        }
        Ok(())
    }
}

/// Projection of a spatial axis with a sliding window: `R*Nop + P*Hstride`.
fn windowed(kernel_dim: &str, out_dim: &str, stride: &str) -> Vec<Term> {
    vec![
        Term::scaled(kernel_dim, "Nop"),
        Term::scaled(out_dim, stride),
    ]
}

/// Projection of a grouped channel axis: `G*Cgroup + C*Nop`.
fn grouped(channel_dim: &str, group_size: &str) -> Vec<Term> {
    vec![
        Term::scaled("G", group_size),
        Term::scaled(channel_dim, "Nop"),
    ]
}

impl Translate for ConvDesc {
    /// Build a grouped convolution workload. The document is the same in
    /// both modes.
    fn translate(
        &self,
        _mode: TranslateMode,
        _templates: &dyn TemplateProvider,
    ) -> Result<Workload, TranslateError> {
        self.check_groups()?;
        let p = self.p()?;
        let q = self.q()?;

        let in_channels_per_group = self.c / self.g;
        let out_channels_per_group = self.m / self.g;

        let dims = ["G", "C", "M", "R", "S", "N", "P", "Q"];

        let weights = Projection::identity(&["G", "C", "M", "R", "S"]);
        let direct = |channels: Vec<Term>| {
            vec![
                vec![Term::dim("N")],
                channels,
                vec![Term::dim("P")],
                vec![Term::dim("Q")],
            ]
        };
        let sliding = |channels: Vec<Term>| {
            vec![
                vec![Term::dim("N")],
                channels,
                windowed("R", "P", "Hstride"),
                windowed("S", "Q", "Wstride"),
            ]
        };

        // A transposed convolution reads each input element once and scatters
        // it over a window of the output, so the sliding-window addressing
        // moves from the input to the output.
        let (inputs, outputs) = if self.transposed {
            (
                direct(grouped("C", "Cgroup")),
                sliding(grouped("M", "Mgroup")),
            )
        } else {
            (
                sliding(grouped("C", "Cgroup")),
                direct(grouped("M", "Mgroup")),
            )
        };

        let shape = ProblemShape {
            name: self.workload_name(),
            dimensions: dims.iter().map(|d| d.to_string()).collect(),
            coefficients: vec![
                Coefficient::new("Cgroup", in_channels_per_group),
                Coefficient::new("Mgroup", out_channels_per_group),
                Coefficient::new("Hstride", self.h_stride),
                Coefficient::new("Wstride", self.w_stride),
                Coefficient::new("Nop", 1),
            ],
            data_spaces: vec![
                DataSpace {
                    name: "Weights".to_string(),
                    projection: weights,
                    read_write: false,
                },
                DataSpace {
                    name: "Inputs".to_string(),
                    projection: Projection::Affine(inputs),
                    read_write: false,
                },
                DataSpace {
                    name: "Outputs".to_string(),
                    projection: Projection::Affine(outputs),
                    read_write: true,
                },
            ],
        };

        let instance: Instance = [
            ("G", self.g),
            ("C", in_channels_per_group),
            ("M", out_channels_per_group),
            ("N", self.n),
            ("R", self.r),
            ("S", self.s),
            ("P", p),
            ("Q", q),
        ]
        .into_iter()
        .collect();

        Ok(Workload { shape, instance })
    }
}
