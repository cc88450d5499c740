//! the layer contract. Every layer goes through the same lifecycle
//! during `Net::compile`: `parse_param` reads its string options into a
//! `ParamDict`, `compute_output_shape` derives its output shape from its
//! inputs', `load_param` copies the parsed `ParamDict` into the layer's
//! own fields, and (depending on compile mode) either `init_model`
//! synthesizes fresh weights or `load_model` pulls them from a weight
//! stream. `forward`/`forward_inplace` only ever run after compile.

pub mod activation;
pub mod batchnorm;
pub mod convolution;
pub mod input;
pub mod registry;
pub mod split;

use crate::config::LayerOption;
use crate::data_reader::InitializerFromDataReader;
use crate::error::GPResult;
use crate::net::NetOption;
use crate::param_dict::ParamDict;
use crate::tensor::Tensor;

/// Fields every layer carries, regardless of kind. Concrete layers embed
/// one and expose it through `base`/`base_mut` rather than re-declaring
/// bookkeeping the graph builder needs to poke at generically.
#[derive(Default, Clone)]
pub struct LayerBase {
    pub type_name: String,
    pub name: String,
    pub bottoms: Vec<i32>,
    pub tops: Vec<i32>,
    pub bottom_shapes: Vec<Vec<i64>>,
    pub top_shapes: Vec<Vec<i64>>,
}

pub trait Layer: Send + Sync {
    fn base(&self) -> &LayerBase;
    fn base_mut(&mut self) -> &mut LayerBase;

    /// Whether this layer reads exactly one input and writes exactly one
    /// output (the common case); `false` opts into the multi-blob path in
    /// `Extractor::do_forward_layer`.
    fn one_blob_only(&self) -> bool {
        true
    }

    /// Whether `forward_inplace` may be used in place of `forward` when
    /// lightmode is on and the input blob isn't shared.
    fn supports_inplace(&self) -> bool {
        false
    }

    fn parse_param(&mut self, option: &LayerOption, pd: &mut ParamDict) -> GPResult<()>;

    fn compute_output_shape(&mut self, pd: &mut ParamDict) -> GPResult<()>;

    fn load_param(&mut self, pd: &ParamDict) -> GPResult<()>;

    /// Compile mode `Initial`: synthesize plausible weights with no
    /// backing weight stream.
    fn init_model(&mut self) -> GPResult<()> {
        Ok(())
    }

    /// Compile mode `Deserialize`: pull weights positionally off `init`.
    fn load_model(&mut self, _init: &mut InitializerFromDataReader) -> GPResult<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut Vec<Tensor>, opt: &NetOption) -> GPResult<()>;

    fn forward_inplace(&self, _bottoms_tops: &mut [Tensor], _opt: &NetOption) -> GPResult<()> {
        Err(crate::error::GPError::RuntimeKernelError(format!(
            "{} does not support in-place forward",
            self.base().type_name
        )))
    }
}
