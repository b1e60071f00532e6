//! Convolution operators, plus spatial geometry shared with pooling.

use infergraph_shape_inference::{
    InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicDim, SymbolicShape,
};
use infergraph_tensor::{DataType, Indices, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Padding mode used by a convolution or pooling operator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Padding {
    /// Pad the input so that the size of each output spatial dimension is
    /// `ceil(input_size / stride)`. When the total padding for a dimension
    /// is odd, the extra element goes at the end.
    Same,

    /// Fixed padding specified as `[starts..., ends...]`, with one start and
    /// one end per spatial dimension.
    Fixed(Vec<usize>),
}

impl Default for Padding {
    fn default() -> Padding {
        Padding::Fixed(Vec::new())
    }
}

/// Padding for a single spatial dimension.
#[derive(Clone, Copy)]
pub(crate) enum DimPadding {
    Same,
    Fixed { start: usize, end: usize },
}

impl Padding {
    /// Get the padding for spatial dimension `dim`. An empty fixed padding
    /// list means no padding.
    pub(crate) fn dim(
        &self,
        dim: usize,
        spatial_dims: usize,
    ) -> Result<DimPadding, InferShapesError> {
        match self {
            Padding::Same => Ok(DimPadding::Same),
            Padding::Fixed(pads) if pads.is_empty() => Ok(DimPadding::Fixed { start: 0, end: 0 }),
            Padding::Fixed(pads) => {
                if pads.len() != spatial_dims * 2 {
                    return Err(InferShapesError::InvalidValue(
                        "pads must have two entries per spatial dimension",
                    ));
                }
                Ok(DimPadding::Fixed {
                    start: pads[dim],
                    end: pads[spatial_dims + dim],
                })
            }
        }
    }
}

/// Get a per-spatial-dimension attribute such as strides or dilations. An
/// empty list means all ones.
pub(crate) fn spatial_attr(
    values: &[usize],
    spatial_dims: usize,
    name: &'static str,
) -> Result<SmallVec<[usize; 4]>, InferShapesError> {
    if values.is_empty() {
        return Ok(SmallVec::from_elem(1, spatial_dims));
    }
    if values.len() != spatial_dims || values.contains(&0) {
        return Err(InferShapesError::InvalidValue(name));
    }
    Ok(values.iter().copied().collect())
}

/// Return the output size for a spatial dimension of a convolution or
/// pooling operation.
pub(crate) fn output_size(
    in_size: &SymbolicDim,
    kernel_size: &SymbolicDim,
    stride: usize,
    dilation: usize,
    padding: DimPadding,
    ceil_mode: bool,
) -> Result<SymbolicDim, InferShapesError> {
    let stride = stride as i64;
    let size = match padding {
        DimPadding::Same => in_size.div_ceil(&SymbolicDim::Value(stride)),
        DimPadding::Fixed { start, end } => {
            let padded = in_size.clone() + (start + end) as i64;
            let window = (kernel_size.clone() - 1) * dilation as i64 + 1;
            let span = padded - window;
            let steps = if ceil_mode {
                let steps = span.div_ceil(&SymbolicDim::Value(stride));
                // The last window must start inside the input or the start
                // padding.
                match (&steps, in_size) {
                    (SymbolicDim::Value(steps), SymbolicDim::Value(in_size))
                        if *steps > 0 && steps * stride >= in_size + start as i64 =>
                    {
                        SymbolicDim::Value(steps - 1)
                    }
                    (SymbolicDim::Value(_), _) => steps,
                    _ => SymbolicDim::Unknown,
                }
            } else {
                span / stride
            };
            steps + 1
        }
    };
    if size.value().is_some_and(|size| size < 1) {
        return Err(InferShapesError::IncompatibleShapes(
            "kernel is larger than the padded input",
        ));
    }
    Ok(size)
}

/// Resolve padding to concrete `[starts..., ends...]` values, given the
/// input and output spatial sizes.
pub(crate) fn resolve_pads(
    padding: &Padding,
    in_sizes: &[usize],
    out_sizes: &[usize],
    kernel: &[usize],
    strides: &[usize],
    dilations: &[usize],
) -> Result<Vec<usize>, OpError> {
    let spatial_dims = in_sizes.len();
    let mut pads = vec![0; spatial_dims * 2];
    for dim in 0..spatial_dims {
        let (start, end) = match padding.dim(dim, spatial_dims)? {
            DimPadding::Fixed { start, end } => (start, end),
            DimPadding::Same => {
                let window = (kernel[dim] - 1) * dilations[dim] + 1;
                let needed = (out_sizes[dim].saturating_sub(1) * strides[dim] + window)
                    .saturating_sub(in_sizes[dim]);
                (needed / 2, needed - needed / 2)
            }
        };
        pads[dim] = start;
        pads[spatial_dims + dim] = end;
    }
    Ok(pads)
}

/// Resolved geometry of a convolution, in terms of concrete input sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvParams {
    /// Padding as `[starts..., ends...]`.
    pub pads: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub groups: usize,
}

fn require_float(inputs: &InferInputs) -> Result<(), InferShapesError> {
    if inputs.iter().any(|x| x.dtype() != DataType::Float) {
        return Err(InferShapesError::IncorrectType(
            "convolution inputs must be float tensors",
        ));
    }
    Ok(())
}

/// Check the rank of convolution inputs, returning the input and weight
/// dims if both are known.
fn conv_input_dims<'a>(
    x: &'a PartialTensor,
    weight: &'a PartialTensor,
) -> Result<Option<(&'a [SymbolicDim], &'a [SymbolicDim])>, InferShapesError> {
    x.shape().require_min_rank(3)?;
    weight.shape().require_min_rank(3)?;
    let (Some(x_dims), Some(w_dims)) = (x.shape().dims(), weight.shape().dims()) else {
        return Ok(None);
    };
    if x_dims.len() != w_dims.len() {
        return Err(InferShapesError::IncorrectRank(
            "input and weights must have the same rank",
        ));
    }
    Ok(Some((x_dims, w_dims)))
}

fn check_bias(bias: Option<&PartialTensor>, channels: &SymbolicDim) -> Result<(), InferShapesError> {
    if let Some(bias) = bias {
        let shape = bias.shape().clone().with_rank(1)?;
        shape.dim(0).refine(channels)?;
    }
    Ok(())
}

/// N-dimensional convolution, with inputs `[N, C, spatial...]` and weights
/// `[M, C / groups, kernel...]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Conv {
    pub padding: Padding,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub groups: usize,
}

impl Default for Conv {
    fn default() -> Conv {
        Conv {
            padding: Padding::default(),
            strides: Vec::new(),
            dilations: Vec::new(),
            groups: 1,
        }
    }
}

impl InferShapes for Conv {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let weight = inputs.require(1)?;
        require_float(&inputs)?;
        if self.groups == 0 {
            return Err(InferShapesError::InvalidValue("groups must be positive"));
        }

        let Some((x_dims, w_dims)) = conv_input_dims(x, weight)? else {
            return Ok(vec![PartialTensor::unknown(DataType::Float)]);
        };
        let spatial_dims = x_dims.len() - 2;
        let strides = spatial_attr(&self.strides, spatial_dims, "invalid strides")?;
        let dilations = spatial_attr(&self.dilations, spatial_dims, "invalid dilations")?;

        let groups = self.groups as i64;
        x_dims[1].refine(&(w_dims[1].clone() * groups))?;
        if let Some(out_channels) = w_dims[0].value() {
            if out_channels % groups != 0 {
                return Err(InferShapesError::IncompatibleShapes(
                    "output channels must be divisible by groups",
                ));
            }
        }
        check_bias(inputs.get(2), &w_dims[0])?;

        let mut out_dims = vec![x_dims[0].clone(), w_dims[0].clone()];
        for dim in 0..spatial_dims {
            out_dims.push(output_size(
                &x_dims[2 + dim],
                &w_dims[2 + dim],
                strides[dim],
                dilations[dim],
                self.padding.dim(dim, spatial_dims)?,
                false,
            )?);
        }
        Ok(vec![PartialTensor::new(
            DataType::Float,
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl Conv {
    fn params(&self, x: &[usize], weight: &[usize], out: &[usize]) -> Result<ConvParams, OpError> {
        let spatial_dims = x.len() - 2;
        let strides = spatial_attr(&self.strides, spatial_dims, "invalid strides")?;
        let dilations = spatial_attr(&self.dilations, spatial_dims, "invalid dilations")?;
        let pads = resolve_pads(
            &self.padding,
            &x[2..],
            &out[2..],
            &weight[2..],
            &strides,
            &dilations,
        )?;
        Ok(ConvParams {
            pads,
            strides: strides.to_vec(),
            dilations: dilations.to_vec(),
            groups: self.groups,
        })
    }
}

impl Operator for Conv {
    fn name(&self) -> &str {
        "Conv"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(3))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let weight = inputs.require(1)?;
        let out = single_output(outputs)?;
        let params = self.params(x.shape(), weight.shape(), out.shape())?;
        backend.conv(&params, x, weight, inputs.get(2), out)
    }
}

fn bias_value(bias: Option<&Tensor<f32>>, channel: usize) -> f32 {
    bias.and_then(|b| b.data().get(channel).copied()).unwrap_or(0.)
}

/// Reference N-dimensional convolution.
pub fn conv(
    params: &ConvParams,
    x: &Tensor<f32>,
    weight: &Tensor<f32>,
    bias: Option<&Tensor<f32>>,
    out: &mut Tensor<f32>,
) {
    let spatial_dims = x.ndim() - 2;
    let in_channels_per_group = weight.size(1);
    let out_channels_per_group = (weight.size(0) / params.groups).max(1);
    let kernel_shape = weight.shape()[2..].to_vec();
    let out_shape = out.shape().to_vec();

    let mut x_index: SmallVec<[usize; 5]> = SmallVec::from_elem(0, x.ndim());
    let mut w_index: SmallVec<[usize; 5]> = SmallVec::from_elem(0, weight.ndim());

    for (out_index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        let (batch, out_chan) = (out_index[0], out_index[1]);
        let group = out_chan / out_channels_per_group;
        let mut acc = bias_value(bias, out_chan);

        x_index[0] = batch;
        w_index[0] = out_chan;
        for in_chan in 0..in_channels_per_group {
            x_index[1] = group * in_channels_per_group + in_chan;
            w_index[1] = in_chan;

            'kernel: for k in Indices::from_shape(&kernel_shape) {
                for d in 0..spatial_dims {
                    let pos = (out_index[2 + d] * params.strides[d] + k[d] * params.dilations[d])
                        as isize
                        - params.pads[d] as isize;
                    if pos < 0 || pos as usize >= x.size(2 + d) {
                        continue 'kernel;
                    }
                    x_index[2 + d] = pos as usize;
                    w_index[2 + d] = k[d];
                }
                if let (Some(x), Some(w)) = (x.get(&x_index), weight.get(&w_index)) {
                    acc += x * w;
                }
            }
        }
        *y = acc;
    }
}

/// N-dimensional transposed convolution, with inputs `[N, C, spatial...]`
/// and weights `[C, M / groups, kernel...]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvTranspose {
    pub padding: Padding,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub groups: usize,
    pub output_padding: Vec<usize>,
}

impl Default for ConvTranspose {
    fn default() -> ConvTranspose {
        ConvTranspose {
            padding: Padding::default(),
            strides: Vec::new(),
            dilations: Vec::new(),
            groups: 1,
            output_padding: Vec::new(),
        }
    }
}

impl InferShapes for ConvTranspose {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let weight = inputs.require(1)?;
        require_float(&inputs)?;
        if self.groups == 0 {
            return Err(InferShapesError::InvalidValue("groups must be positive"));
        }

        let Some((x_dims, w_dims)) = conv_input_dims(x, weight)? else {
            return Ok(vec![PartialTensor::unknown(DataType::Float)]);
        };
        let spatial_dims = x_dims.len() - 2;
        let strides = spatial_attr(&self.strides, spatial_dims, "invalid strides")?;
        let dilations = spatial_attr(&self.dilations, spatial_dims, "invalid dilations")?;
        let output_padding = if self.output_padding.is_empty() {
            vec![0; spatial_dims]
        } else if self.output_padding.len() == spatial_dims {
            self.output_padding.clone()
        } else {
            return Err(InferShapesError::InvalidValue("invalid output padding"));
        };

        x_dims[1].refine(&w_dims[0])?;
        let out_channels = w_dims[1].clone() * self.groups as i64;
        check_bias(inputs.get(2), &out_channels)?;

        let mut out_dims = vec![x_dims[0].clone(), out_channels];
        for dim in 0..spatial_dims {
            let in_size = x_dims[2 + dim].clone();
            let size = match self.padding.dim(dim, spatial_dims)? {
                DimPadding::Same => in_size * strides[dim] as i64,
                DimPadding::Fixed { start, end } => {
                    let window = (w_dims[2 + dim].clone() - 1) * dilations[dim] as i64 + 1;
                    (in_size - 1) * strides[dim] as i64 + window + output_padding[dim] as i64
                        - (start + end) as i64
                }
            };
            if size.value().is_some_and(|size| size < 1) {
                return Err(InferShapesError::IncompatibleShapes(
                    "padding is larger than the output",
                ));
            }
            out_dims.push(size);
        }
        Ok(vec![PartialTensor::new(
            DataType::Float,
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl ConvTranspose {
    fn params(&self, x: &[usize], weight: &[usize], out: &[usize]) -> Result<ConvParams, OpError> {
        let spatial_dims = x.len() - 2;
        let strides = spatial_attr(&self.strides, spatial_dims, "invalid strides")?;
        let dilations = spatial_attr(&self.dilations, spatial_dims, "invalid dilations")?;

        let mut pads = vec![0; spatial_dims * 2];
        for dim in 0..spatial_dims {
            if let DimPadding::Fixed { start, end } = self.padding.dim(dim, spatial_dims)? {
                pads[dim] = start;
                pads[spatial_dims + dim] = end;
            } else {
                let window = (weight[2 + dim] - 1) * dilations[dim] + 1;
                let full = (x[2 + dim] - 1) * strides[dim] + window;
                let total = full.saturating_sub(out[2 + dim]);
                pads[dim] = total / 2;
                pads[spatial_dims + dim] = total - total / 2;
            }
        }
        Ok(ConvParams {
            pads,
            strides: strides.to_vec(),
            dilations: dilations.to_vec(),
            groups: self.groups,
        })
    }
}

impl Operator for ConvTranspose {
    fn name(&self) -> &str {
        "ConvTranspose"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(3))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let weight = inputs.require(1)?;
        let out = single_output(outputs)?;
        let params = self.params(x.shape(), weight.shape(), out.shape())?;
        backend.conv_transpose(&params, x, weight, inputs.get(2), out)
    }
}

/// Reference N-dimensional transposed convolution.
///
/// Each input element is multiplied by the kernel and accumulated into the
/// output window it maps to.
pub fn conv_transpose(
    params: &ConvParams,
    x: &Tensor<f32>,
    weight: &Tensor<f32>,
    bias: Option<&Tensor<f32>>,
    out: &mut Tensor<f32>,
) {
    let spatial_dims = x.ndim() - 2;
    let in_channels_per_group = (weight.size(0) / params.groups).max(1);
    let out_channels_per_group = weight.size(1);
    let kernel_shape = weight.shape()[2..].to_vec();
    let out_shape = out.shape().to_vec();

    for (index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        *y = bias_value(bias, index[1]);
    }

    let mut out_index: SmallVec<[usize; 5]> = SmallVec::from_elem(0, out.ndim());
    let mut w_index: SmallVec<[usize; 5]> = SmallVec::from_elem(0, weight.ndim());

    for (x_index, &x_val) in x.indices().zip(x.iter()) {
        let (batch, in_chan) = (x_index[0], x_index[1]);
        let group = in_chan / in_channels_per_group;
        out_index[0] = batch;
        w_index[0] = in_chan;

        for chan in 0..out_channels_per_group {
            out_index[1] = group * out_channels_per_group + chan;
            w_index[1] = chan;

            'kernel: for k in Indices::from_shape(&kernel_shape) {
                for d in 0..spatial_dims {
                    let pos = (x_index[2 + d] * params.strides[d] + k[d] * params.dilations[d])
                        as isize
                        - params.pads[d] as isize;
                    if pos < 0 || pos as usize >= out_shape[2 + d] {
                        continue 'kernel;
                    }
                    out_index[2 + d] = pos as usize;
                    w_index[2 + d] = k[d];
                }
                let Some(&w) = weight.get(&w_index) else {
                    continue;
                };
                if let Some(y) = out.get_mut(&out_index) {
                    *y += x_val * w;
                }
            }
        }
    }
}
