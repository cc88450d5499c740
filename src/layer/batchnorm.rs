//! The fused-batchnorm counterpart `Net::graph_construct` synthesizes
//! after a `Convolution` whose option map carries a `batchnorm` key.
//! Channel count is derived from the bottom shape rather than from an
//! option, since the synthesized layer only ever gets `type/name/input/output`.

use crate::config::LayerOption;
use crate::data_reader::InitializerFromDataReader;
use crate::dtype::ScalarType;
use crate::error::GPResult;
use crate::layer::{Layer, LayerBase};
use crate::net::NetOption;
use crate::param_dict::{ParamDict, OUTPUT_SHAPE_HINT};
use crate::tensor::Tensor;

pub struct BatchNormalization {
    base: LayerBase,
    channels: i64,
    gamma: Tensor,
    beta: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
    eps: f32,
}

impl BatchNormalization {
    pub fn new() -> Self {
        BatchNormalization {
            base: LayerBase::default(),
            channels: 0,
            gamma: Tensor::undefined(),
            beta: Tensor::undefined(),
            running_mean: Tensor::undefined(),
            running_var: Tensor::undefined(),
            eps: 1e-5,
        }
    }
}

impl Layer for BatchNormalization {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn supports_inplace(&self) -> bool {
        true
    }

    fn parse_param(&mut self, option: &LayerOption, pd: &mut ParamDict) -> GPResult<()> {
        pd.set_float(0, crate::config::opt_find_float(option, "eps", 1e-5));
        Ok(())
    }

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()> {
        let shape = self.base.bottom_shapes[0].clone();
        self.channels = *shape.get(1).unwrap_or(&0);
        pd.set_tensor(OUTPUT_SHAPE_HINT, Tensor::from_i64_slice(&shape)?);
        self.base.top_shapes = vec![shape];
        Ok(())
    }

    fn load_param(&mut self, pd: &ParamDict) -> GPResult<()> {
        self.eps = pd.get_float(0, 1e-5) as f32;
        Ok(())
    }

    /// Identity transform by default: gamma=1, beta=0, mean=0, var=1.
    /// Randomizing these would make the layer behave like noise rather
    /// than a no-op, which is never the intent for a synthesized layer.
    fn init_model(&mut self) -> GPResult<()> {
        let c = [self.channels];
        self.gamma = Tensor::from_f32_slice(&vec![1.0; self.channels as usize], &c)?;
        self.beta = Tensor::zeros(&c, ScalarType::Float)?;
        self.running_mean = Tensor::zeros(&c, ScalarType::Float)?;
        self.running_var = Tensor::from_f32_slice(&vec![1.0; self.channels as usize], &c)?;
        Ok(())
    }

    fn load_model(&mut self, init: &mut InitializerFromDataReader) -> GPResult<()> {
        let c = [self.channels];
        self.gamma = init.load(&c)?;
        self.beta = init.load(&c)?;
        self.running_mean = init.load(&c)?;
        self.running_var = init.load(&c)?;
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut Vec<Tensor>, opt: &NetOption) -> GPResult<()> {
        let mut out = bottoms[0].clone()?;
        self.forward_inplace(std::slice::from_mut(&mut out), opt)?;
        tops.push(out);
        Ok(())
    }

    fn forward_inplace(&self, bottoms_tops: &mut [Tensor], _opt: &NetOption) -> GPResult<()> {
        let t = &mut bottoms_tops[0];
        let sizes = t.sizes().to_vec();
        let (n, c, h, w) = (sizes[0], sizes[1], sizes[2], sizes[3]);
        let gamma = self.gamma.as_slice_f32()?.to_vec();
        let beta = self.beta.as_slice_f32()?.to_vec();
        let mean = self.running_mean.as_slice_f32()?.to_vec();
        let var = self.running_var.as_slice_f32()?.to_vec();
        let hw = (h * w) as usize;
        let data = t.as_slice_mut_f32()?;
        for ni in 0..n as usize {
            for ci in 0..c as usize {
                let scale = gamma[ci] / (var[ci] + self.eps).sqrt();
                let shift = beta[ci] - mean[ci] * scale;
                let base = (ni * c as usize + ci) * hw;
                for v in &mut data[base..base + hw] {
                    *v = *v * scale + shift;
                }
            }
        }
        Ok(())
    }
}
