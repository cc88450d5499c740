//! Pointwise activations. Both support in-place forward, the common case
//! the lightmode fast path in `Extractor` is built to exploit.

use crate::config::LayerOption;
use crate::error::GPResult;
use crate::layer::{Layer, LayerBase};
use crate::net::NetOption;
use crate::param_dict::{ParamDict, OUTPUT_SHAPE_HINT};
use crate::tensor::dispatch::elementwise_inplace_f32;
use crate::tensor::Tensor;

pub struct ReLU {
    base: LayerBase,
}

impl ReLU {
    pub fn new() -> Self {
        ReLU { base: LayerBase::default() }
    }
}

impl Layer for ReLU {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn supports_inplace(&self) -> bool {
        true
    }

    fn parse_param(&mut self, _option: &LayerOption, _pd: &mut ParamDict) -> GPResult<()> {
        Ok(())
    }

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()> {
        let shape = self.base.bottom_shapes[0].clone();
        pd.set_tensor(OUTPUT_SHAPE_HINT, Tensor::from_i64_slice(&shape)?);
        self.base.top_shapes = vec![shape];
        Ok(())
    }

    fn load_param(&mut self, _pd: &ParamDict) -> GPResult<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut Vec<Tensor>, opt: &NetOption) -> GPResult<()> {
        let mut out = bottoms[0].clone()?;
        self.forward_inplace(std::slice::from_mut(&mut out), opt)?;
        tops.push(out);
        Ok(())
    }

    fn forward_inplace(&self, bottoms_tops: &mut [Tensor], _opt: &NetOption) -> GPResult<()> {
        elementwise_inplace_f32(&mut bottoms_tops[0], |v| v.max(0.0))
    }
}

pub struct Sigmoid {
    base: LayerBase,
}

impl Sigmoid {
    pub fn new() -> Self {
        Sigmoid { base: LayerBase::default() }
    }
}

impl Layer for Sigmoid {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn supports_inplace(&self) -> bool {
        true
    }

    fn parse_param(&mut self, _option: &LayerOption, _pd: &mut ParamDict) -> GPResult<()> {
        Ok(())
    }

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()> {
        let shape = self.base.bottom_shapes[0].clone();
        pd.set_tensor(OUTPUT_SHAPE_HINT, Tensor::from_i64_slice(&shape)?);
        self.base.top_shapes = vec![shape];
        Ok(())
    }

    fn load_param(&mut self, _pd: &ParamDict) -> GPResult<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut Vec<Tensor>, opt: &NetOption) -> GPResult<()> {
        let mut out = bottoms[0].clone()?;
        self.forward_inplace(std::slice::from_mut(&mut out), opt)?;
        tops.push(out);
        Ok(())
    }

    fn forward_inplace(&self, bottoms_tops: &mut [Tensor], _opt: &NetOption) -> GPResult<()> {
        elementwise_inplace_f32(&mut bottoms_tops[0], |v| 1.0 / (1.0 + (-v).exp()))
    }
}
