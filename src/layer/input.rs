//! The root of a graph: declares its own output shape from layer options
//! rather than deriving it from any bottom (it has none). In well-formed
//! usage its blob is always pre-filled by `Extractor::input`, so `forward`
//! only exists to make the contract total.

use crate::config::{opt_find_int, LayerOption};
use crate::data_reader::InitializerFromDataReader;
use crate::error::GPResult;
use crate::layer::{Layer, LayerBase};
use crate::net::NetOption;
use crate::param_dict::{ParamDict, OUTPUT_SHAPE_HINT};
use crate::tensor::Tensor;

pub struct Input {
    base: LayerBase,
    w: i64,
    h: i64,
    c: i64,
}

impl Input {
    pub fn new() -> Self {
        Input { base: LayerBase::default(), w: 0, h: 0, c: 0 }
    }
}

impl Layer for Input {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn parse_param(&mut self, option: &LayerOption, pd: &mut ParamDict) -> GPResult<()> {
        pd.set_int(0, opt_find_int(option, "w", 0));
        pd.set_int(1, opt_find_int(option, "h", 0));
        pd.set_int(2, opt_find_int(option, "c", 0));
        Ok(())
    }

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()> {
        let shape = vec![1, pd.get_int(2, 0), pd.get_int(1, 0), pd.get_int(0, 0)];
        pd.set_tensor(OUTPUT_SHAPE_HINT, Tensor::from_i64_slice(&shape)?);
        self.base.top_shapes = vec![shape];
        Ok(())
    }

    fn load_param(&mut self, pd: &ParamDict) -> GPResult<()> {
        self.w = pd.get_int(0, 0);
        self.h = pd.get_int(1, 0);
        self.c = pd.get_int(2, 0);
        Ok(())
    }

    fn load_model(&mut self, _init: &mut InitializerFromDataReader) -> GPResult<()> {
        Ok(())
    }

    fn forward(&self, _bottoms: &[Tensor], tops: &mut Vec<Tensor>, _opt: &NetOption) -> GPResult<()> {
        tops.push(Tensor::zeros(&[1, self.c, self.h, self.w], crate::dtype::ScalarType::Float)?);
        Ok(())
    }
}
