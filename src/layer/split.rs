//! Fan-out node the graph builder inserts automatically whenever a blob
//! has more than one consumer (see `Net::graph_construct`). Every output
//! is a cheap alias of the single input, not a deep copy.

use crate::config::LayerOption;
use crate::error::GPResult;
use crate::layer::{Layer, LayerBase};
use crate::net::NetOption;
use crate::param_dict::{ParamDict, OUTPUT_SHAPE_HINT};
use crate::tensor::Tensor;

pub struct Split {
    base: LayerBase,
}

impl Split {
    pub fn new() -> Self {
        Split { base: LayerBase::default() }
    }
}

impl Layer for Split {
    fn base(&self) -> &LayerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn one_blob_only(&self) -> bool {
        false
    }

    fn parse_param(&mut self, _option: &LayerOption, _pd: &mut ParamDict) -> GPResult<()> {
        Ok(())
    }

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()> {
        let shape = self.base.bottom_shapes.first().cloned().unwrap_or_default();
        pd.set_tensor(OUTPUT_SHAPE_HINT, Tensor::from_i64_slice(&shape)?);
        let n = self.base.tops.len().max(1);
        self.base.top_shapes = vec![shape; n];
        Ok(())
    }

    fn load_param(&mut self, _pd: &ParamDict) -> GPResult<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut Vec<Tensor>, _opt: &NetOption) -> GPResult<()> {
        for _ in &self.base.tops {
            tops.push(bottoms[0].alias());
        }
        Ok(())
    }
}
