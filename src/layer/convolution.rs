//! 2-D convolution, the one representative layer binding the layer
//! contract to an actual kernel. Grouped cross-correlation with zero
//! padding; transposed convolution (`output_padding`) is accepted as an
//! option but not executed, since nothing in this engine's graphs needs
//! it as a forward op.
//!
//! `output_padding_height`/`output_padding_width` are kept as two
//! genuinely distinct keys here (see DESIGN.md), not aliased to a single
//! `output_padding` value.

use ndarray::{Array4, ArrayView4};

use crate::config::{opt_check_bool, opt_find_float, opt_find_int, LayerOption};
use crate::data_reader::InitializerFromDataReader;
use crate::dtype::ScalarType;
use crate::error::{GPError, GPResult};
use crate::layer::{Layer, LayerBase};
use crate::net::NetOption;
use crate::param_dict::{ParamDict, OUTPUT_SHAPE_HINT};
use crate::tensor::Tensor;

const KEY_NUM_OUTPUT: i32 = 0;
const KEY_KERNEL_H: i32 = 1;
const KEY_KERNEL_W: i32 = 2;
const KEY_STRIDE_H: i32 = 3;
const KEY_STRIDE_W: i32 = 4;
const KEY_PAD_H: i32 = 5;
const KEY_PAD_W: i32 = 6;
const KEY_DILATION_H: i32 = 7;
const KEY_DILATION_W: i32 = 8;
const KEY_OUTPUT_PADDING_H: i32 = 9;
const KEY_OUTPUT_PADDING_W: i32 = 10;
const KEY_GROUPS: i32 = 11;
const KEY_BIAS_TERM: i32 = 12;

pub struct Convolution {
    base: LayerBase,
    in_channels: i64,
    out_channels: i64,
    kernel_h: i64,
    kernel_w: i64,
    stride_h: i64,
    stride_w: i64,
    pad_h: i64,
    pad_w: i64,
    dilation_h: i64,
    dilation_w: i64,
    #[allow(dead_code)]
    output_padding_h: i64,
    #[allow(dead_code)]
    output_padding_w: i64,
    groups: i64,
    bias_term: bool,
    pub weight_data: Tensor,
    pub bias_data: Tensor,
}

fn find_axis_pair(option: &LayerOption, both_key: &str, h_key: &str, w_key: &str, default: i64) -> (i64, i64) {
    if let Some(v) = option.get(both_key) {
        let v: i64 = v.parse().unwrap_or(default);
        (v, v)
    } else {
        (
            opt_find_int(option, h_key, default),
            opt_find_int(option, w_key, default),
        )
    }
}

impl Convolution {
    pub fn new() -> Self {
        Convolution {
            base: LayerBase::default(),
            in_channels: 0,
            out_channels: 0,
            kernel_h: 1,
            kernel_w: 1,
            stride_h: 1,
            stride_w: 1,
            pad_h: 0,
            pad_w: 0,
            dilation_h: 1,
            dilation_w: 1,
            output_padding_h: 0,
            output_padding_w: 0,
            groups: 1,
            bias_term: true,
            weight_data: Tensor::undefined(),
            bias_data: Tensor::undefined(),
        }
    }
}

impl Layer for Convolution {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn parse_param(&mut self, option: &LayerOption, pd: &mut ParamDict) -> GPResult<()> {
        let (kh, kw) = find_axis_pair(option, "kernel", "kernel_h", "kernel_w", 1);
        let (sh, sw) = find_axis_pair(option, "stride", "stride_h", "stride_w", 1);
        let (ph, pw) = find_axis_pair(option, "pad", "pad_h", "pad_w", 0);
        let (dh, dw) = find_axis_pair(option, "dilation", "dilation_h", "dilation_w", 1);
        let (oph, opw) = find_axis_pair(option, "output_padding", "output_padding_h", "output_padding_w", 0);
        let num_output = opt_find_int(option, "num_output", 0);
        if num_output <= 0 {
            return Err(GPError::BadOption {
                layer: self.base.name.clone(),
                detail: "num_output must be positive".into(),
            });
        }
        let groups = opt_find_int(option, "groups", 1);
        let bias_term = if option.contains_key("bias_term") {
            opt_check_bool(option, "bias_term")
        } else {
            !option.contains_key("batchnorm")
        };
        let _ = opt_find_float(option, "eps", 1e-5); // consumed by the synthesized BN, not us

        pd.set_int(KEY_NUM_OUTPUT, num_output);
        pd.set_int(KEY_KERNEL_H, kh);
        pd.set_int(KEY_KERNEL_W, kw);
        pd.set_int(KEY_STRIDE_H, sh);
        pd.set_int(KEY_STRIDE_W, sw);
        pd.set_int(KEY_PAD_H, ph);
        pd.set_int(KEY_PAD_W, pw);
        pd.set_int(KEY_DILATION_H, dh);
        pd.set_int(KEY_DILATION_W, dw);
        pd.set_int(KEY_OUTPUT_PADDING_H, oph);
        pd.set_int(KEY_OUTPUT_PADDING_W, opw);
        pd.set_int(KEY_GROUPS, groups);
        pd.set_int(KEY_BIAS_TERM, bias_term as i64);
        Ok(())
    }

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()> {
        let bottom = self.base.bottom_shapes[0].clone();
        let (n, c, h, w) = (bottom[0], bottom[1], bottom[2], bottom[3]);

        let kernel_h = pd.get_int(KEY_KERNEL_H, 1);
        let kernel_w = pd.get_int(KEY_KERNEL_W, 1);
        let stride_h = pd.get_int(KEY_STRIDE_H, 1);
        let stride_w = pd.get_int(KEY_STRIDE_W, 1);
        let pad_h = pd.get_int(KEY_PAD_H, 0);
        let pad_w = pd.get_int(KEY_PAD_W, 0);
        let dilation_h = pd.get_int(KEY_DILATION_H, 1);
        let dilation_w = pd.get_int(KEY_DILATION_W, 1);
        let groups = pd.get_int(KEY_GROUPS, 1);
        let out_channels = pd.get_int(KEY_NUM_OUTPUT, 0);

        if c % groups != 0 || out_channels % groups != 0 {
            return Err(GPError::BadOption {
                layer: self.base.name.clone(),
                detail: format!("groups={groups} must divide both in_channels={c} and num_output={out_channels}"),
            });
        }

        let out_h = (h + 2 * pad_h - dilation_h * (kernel_h - 1) - 1) / stride_h + 1;
        let out_w = (w + 2 * pad_w - dilation_w * (kernel_w - 1) - 1) / stride_w + 1;
        if out_h <= 0 || out_w <= 0 {
            return Err(GPError::ShapeMismatch {
                expected: vec![1, out_channels, 1, 1],
                found: vec![n, c, h, w],
            });
        }

        self.in_channels = c;
        self.out_channels = out_channels;
        let shape = vec![n, out_channels, out_h, out_w];
        pd.set_tensor(OUTPUT_SHAPE_HINT, Tensor::from_i64_slice(&shape)?);
        self.base.top_shapes = vec![shape];
        Ok(())
    }

    fn load_param(&mut self, pd: &ParamDict) -> GPResult<()> {
        self.kernel_h = pd.get_int(KEY_KERNEL_H, 1);
        self.kernel_w = pd.get_int(KEY_KERNEL_W, 1);
        self.stride_h = pd.get_int(KEY_STRIDE_H, 1);
        self.stride_w = pd.get_int(KEY_STRIDE_W, 1);
        self.pad_h = pd.get_int(KEY_PAD_H, 0);
        self.pad_w = pd.get_int(KEY_PAD_W, 0);
        self.dilation_h = pd.get_int(KEY_DILATION_H, 1);
        self.dilation_w = pd.get_int(KEY_DILATION_W, 1);
        self.output_padding_h = pd.get_int(KEY_OUTPUT_PADDING_H, 0);
        self.output_padding_w = pd.get_int(KEY_OUTPUT_PADDING_W, 0);
        self.groups = pd.get_int(KEY_GROUPS, 1);
        self.bias_term = pd.get_int(KEY_BIAS_TERM, 1) != 0;
        self.out_channels = pd.get_int(KEY_NUM_OUTPUT, self.out_channels);
        Ok(())
    }

    fn init_model(&mut self) -> GPResult<()> {
        let weight_shape = [
            self.out_channels,
            self.in_channels / self.groups,
            self.kernel_h,
            self.kernel_w,
        ];
        let fan_in = (weight_shape[1] * weight_shape[2] * weight_shape[3]).max(1) as f32;
        let bound = 1.0 / fan_in.sqrt();
        self.weight_data = Tensor::rand_f32(&weight_shape, bound)?;
        self.bias_data = if self.bias_term {
            Tensor::rand_f32(&[self.out_channels], bound)?
        } else {
            Tensor::undefined()
        };
        Ok(())
    }

    fn load_model(&mut self, init: &mut InitializerFromDataReader) -> GPResult<()> {
        // Bias first iff present, then kernel weights, matching the
        // declared layer order in the weight stream.
        if self.bias_term {
            self.bias_data = init.load(&[self.out_channels])?;
        }
        let weight_shape = [
            self.out_channels,
            self.in_channels / self.groups,
            self.kernel_h,
            self.kernel_w,
        ];
        self.weight_data = init.load(&weight_shape)?;
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut Vec<Tensor>, _opt: &NetOption) -> GPResult<()> {
        let bias = if self.bias_term { Some(&self.bias_data) } else { None };
        let out = convolution(
            &bottoms[0],
            &self.weight_data,
            bias,
            (self.stride_h, self.stride_w),
            (self.pad_h, self.pad_w),
            (self.dilation_h, self.dilation_w),
            self.groups,
        )?;
        tops.push(out);
        Ok(())
    }
}

/// Grouped 2-D cross-correlation over zero-padded input. Contract:
/// `weight` is `[out_channels, in_channels/groups, kh, kw]`; `bias`, if
/// present, is `[out_channels]` and added once per output channel.
pub fn convolution(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    stride: (i64, i64),
    padding: (i64, i64),
    dilation: (i64, i64),
    groups: i64,
) -> GPResult<Tensor> {
    crate::dtype::require_float(input.dtype())?;
    let in_sizes = input.sizes();
    let (n, c_in, h, w) = (in_sizes[0], in_sizes[1], in_sizes[2], in_sizes[3]);
    let w_sizes = weight.sizes();
    let (c_out, c_in_per_group, kh, kw) = (w_sizes[0], w_sizes[1], w_sizes[2], w_sizes[3]);
    let (stride_h, stride_w) = stride;
    let (pad_h, pad_w) = padding;
    let (dilation_h, dilation_w) = dilation;

    let out_h = (h + 2 * pad_h - dilation_h * (kh - 1) - 1) / stride_h + 1;
    let out_w = (w + 2 * pad_w - dilation_w * (kw - 1) - 1) / stride_w + 1;

    let input_arr: ArrayView4<f32> = ArrayView4::from_shape(
        (n as usize, c_in as usize, h as usize, w as usize),
        input.as_slice_f32()?,
    )
    .map_err(|e| GPError::RuntimeKernelError(e.to_string()))?;
    let weight_arr: ArrayView4<f32> = ArrayView4::from_shape(
        (c_out as usize, c_in_per_group as usize, kh as usize, kw as usize),
        weight.as_slice_f32()?,
    )
    .map_err(|e| GPError::RuntimeKernelError(e.to_string()))?;
    let bias_slice: Vec<f32> = match bias {
        Some(b) => b.as_slice_f32()?.to_vec(),
        None => vec![0.0; c_out as usize],
    };

    let c_out_per_group = c_out / groups;
    let mut output = Array4::<f32>::zeros((n as usize, c_out as usize, out_h as usize, out_w as usize));

    for ni in 0..n {
        for g in 0..groups {
            for oc_local in 0..c_out_per_group {
                let oc = g * c_out_per_group + oc_local;
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut acc = bias_slice[oc as usize];
                        for ic_local in 0..c_in_per_group {
                            let ic = g * c_in_per_group + ic_local;
                            for khi in 0..kh {
                                let ih = oh * stride_h - pad_h + khi * dilation_h;
                                if ih < 0 || ih >= h {
                                    continue;
                                }
                                for kwi in 0..kw {
                                    let iw = ow * stride_w - pad_w + kwi * dilation_w;
                                    if iw < 0 || iw >= w {
                                        continue;
                                    }
                                    acc += input_arr[(ni as usize, ic as usize, ih as usize, iw as usize)]
                                        * weight_arr[(oc as usize, ic_local as usize, khi as usize, kwi as usize)];
                                }
                            }
                        }
                        output[(ni as usize, oc as usize, oh as usize, ow as usize)] = acc;
                    }
                }
            }
        }
    }

    Tensor::from_f32_slice(
        output.as_slice().expect("freshly built array is contiguous"),
        &[n, c_out, out_h, out_w],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_3x3_kernel_sums_neighborhood() {
        let input = Tensor::from_f32_slice(&vec![1.0; 9], &[1, 1, 3, 3]).unwrap();
        let weight = Tensor::from_f32_slice(&vec![1.0 / 9.0; 9], &[1, 1, 3, 3]).unwrap();
        let out = convolution(&input, &weight, None, (1, 1), (0, 0), (1, 1), 1).unwrap();
        assert_eq!(out.sizes(), &[1, 1, 1, 1]);
        assert!((out.as_slice_f32().unwrap()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn groups_partition_channels() {
        let input = Tensor::from_f32_slice(&[1.0, 2.0], &[1, 2, 1, 1]).unwrap();
        let weight = Tensor::from_f32_slice(&[3.0, 5.0], &[2, 1, 1, 1]).unwrap();
        let out = convolution(&input, &weight, None, (1, 1), (0, 0), (1, 1), 2).unwrap();
        assert_eq!(out.as_slice_f32().unwrap(), &[3.0, 10.0]);
    }
}
