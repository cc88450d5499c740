//! the executor. `Extractor` lazily pulls blob values on demand:
//! `extract` walks backwards through producers via `forward_layer`,
//! running each layer at most once per extractor instance, with
//! lightmode reclaiming bottom blobs as soon as their only consumer has
//! read them.

use std::collections::HashSet;

use tracing::instrument;

use crate::error::{GPError, GPResult};
use crate::net::{Net, NetOption};
use crate::tensor::Tensor;

pub struct Extractor<'a> {
    net: &'a Net,
    blob_tensors: Vec<Tensor>,
    option: NetOption,
    in_progress: HashSet<usize>,
}

impl<'a> Extractor<'a> {
    pub(crate) fn new(net: &'a Net) -> Self {
        let blob_tensors = (0..net.blobs().len()).map(|_| Tensor::undefined()).collect();
        Extractor { net, blob_tensors, option: net.option, in_progress: HashSet::new() }
    }

    pub fn set_lightmode(&mut self, lightmode: bool) {
        self.option.lightmode = lightmode;
    }

    pub fn clear(&mut self) {
        for t in &mut self.blob_tensors {
            t.reset();
        }
        self.in_progress.clear();
    }

    pub fn input_by_index(&mut self, index: usize, value: Tensor) -> GPResult<()> {
        if index >= self.blob_tensors.len() {
            return Err(GPError::GraphError(format!("blob index {index} out of range")));
        }
        self.blob_tensors[index] = value;
        Ok(())
    }

    pub fn input(&mut self, name: &str, value: Tensor) -> GPResult<()> {
        let idx = self
            .net
            .find_blob_index_by_name(name)
            .ok_or_else(|| GPError::GraphError(format!("no blob named `{name}`")))?;
        self.input_by_index(idx, value)
    }

    pub fn extract_by_index(&mut self, index: usize) -> GPResult<Tensor> {
        if index >= self.blob_tensors.len() {
            return Err(GPError::GraphError(format!("blob index {index} out of range")));
        }
        if !self.blob_tensors[index].defined() {
            let producer = self.net.blobs()[index].producer;
            if producer < 0 {
                return Err(GPError::GraphError(format!(
                    "blob {index} has no producer and was never supplied as input"
                )));
            }
            self.forward_layer(producer as usize)?;
        }
        Ok(self.blob_tensors[index].alias())
    }

    #[instrument(skip(self))]
    pub fn extract(&mut self, name: &str) -> GPResult<Tensor> {
        let idx = self
            .net
            .find_blob_index_by_name(name)
            .ok_or_else(|| GPError::GraphError(format!("no blob named `{name}`")))?;
        self.extract_by_index(idx)
    }

    fn forward_layer(&mut self, layer_index: usize) -> GPResult<()> {
        if !self.in_progress.insert(layer_index) {
            return Err(GPError::GraphError(format!(
                "cycle detected while forwarding layer {layer_index}"
            )));
        }

        let bottoms = self.net.layers()[layer_index].base().bottoms.clone();
        for bottom in bottoms {
            let bottom = bottom as usize;
            if !self.blob_tensors[bottom].defined() {
                let producer = self.net.blobs()[bottom].producer;
                if producer < 0 {
                    self.in_progress.remove(&layer_index);
                    return Err(GPError::GraphError(format!(
                        "blob {bottom} has no producer and was never supplied as input"
                    )));
                }
                self.forward_layer(producer as usize)?;
            }
        }

        let result = self.do_forward_layer(layer_index);
        self.in_progress.remove(&layer_index);
        result
    }

    fn do_forward_layer(&mut self, layer_index: usize) -> GPResult<()> {
        let layer = &self.net.layers()[layer_index];
        let bottoms = layer.base().bottoms.clone();
        let tops = layer.base().tops.clone();
        let one_blob_fast_path = layer.one_blob_only() && bottoms.len() == 1 && tops.len() == 1;

        if one_blob_fast_path {
            let bottom_idx = bottoms[0] as usize;
            let top_idx = tops[0] as usize;
            let needs_copy = self.option.lightmode
                && layer.supports_inplace()
                && self.blob_tensors[bottom_idx].use_count() != 1;
            let bottom_alias = self.blob_tensors[bottom_idx].alias();

            let mut working = if needs_copy { bottom_alias.clone()? } else { bottom_alias };

            if self.option.lightmode && layer.supports_inplace() {
                layer.forward_inplace(std::slice::from_mut(&mut working), &self.option)?;
                self.blob_tensors[top_idx] = working;
            } else {
                let mut outs = Vec::with_capacity(1);
                layer.forward(&[working], &mut outs, &self.option)?;
                self.blob_tensors[top_idx] = outs
                    .into_iter()
                    .next()
                    .ok_or_else(|| GPError::RuntimeKernelError("layer produced no output".into()))?;
            }

            if self.option.lightmode {
                self.blob_tensors[bottom_idx].reset();
            }
            return Ok(());
        }

        let bottom_tensors: Vec<Tensor> = bottoms.iter().map(|&b| self.blob_tensors[b as usize].alias()).collect();
        let mut outs = Vec::with_capacity(tops.len());
        layer.forward(&bottom_tensors, &mut outs, &self.option)?;
        if outs.len() != tops.len() {
            return Err(GPError::RuntimeKernelError(format!(
                "layer `{}` declared {} outputs but forward produced {}",
                layer.base().name,
                tops.len(),
                outs.len()
            )));
        }
        for (top_idx, tensor) in tops.iter().zip(outs) {
            self.blob_tensors[*top_idx as usize] = tensor;
        }
        if self.option.lightmode {
            for &b in &bottoms {
                self.blob_tensors[b as usize].reset();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerOption;
    use crate::net::CompileMode;

    fn opt(pairs: &[(&str, &str)]) -> LayerOption {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    /// A 10-layer linear chain under lightmode: after pulling the final
    /// output, every intermediate blob the cache ever held should have
    /// been reclaimed, leaving only the output itself defined.
    #[test]
    fn lightmode_releases_intermediate_blobs_eagerly() {
        let mut net = Net::new();
        net.add_layer(opt(&[("type", "Input"), ("name", "l0"), ("w", "2"), ("h", "2"), ("c", "1")]));
        for i in 1..10 {
            let name = format!("l{i}");
            net.add_layer(opt(&[("type", "ReLU"), ("name", &name)]));
        }
        net.compile(CompileMode::Initial).unwrap();

        let mut ext = net.create_extractor();
        ext.input("l0", Tensor::from_f32_slice(&[1.0, -2.0, 3.0, -4.0], &[1, 1, 2, 2]).unwrap()).unwrap();
        ext.extract("l9").unwrap();

        let defined = ext.blob_tensors.iter().filter(|t| t.defined()).count();
        assert_eq!(defined, 1, "only the final output blob should still be cached");
    }

    /// A layer that supports in-place forward must not mutate a holder of
    /// its input it doesn't own exclusively.
    #[test]
    fn inplace_layer_preserves_other_holders_input() {
        let mut net = Net::new();
        net.add_layer(opt(&[("type", "Input"), ("name", "x"), ("w", "2"), ("h", "1"), ("c", "1")]));
        net.add_layer(opt(&[("type", "ReLU"), ("name", "y")]));
        net.compile(CompileMode::Initial).unwrap();

        let mut ext = net.create_extractor();
        let input_tensor = Tensor::from_f32_slice(&[-1.0, 2.0], &[1, 1, 1, 2]).unwrap();
        let other_holder = input_tensor.alias();
        ext.input("x", input_tensor).unwrap();
        ext.extract("y").unwrap();

        assert_eq!(other_holder.as_slice_f32().unwrap(), &[-1.0, 2.0]);
    }

    #[test]
    fn unknown_blob_name_is_an_error_not_silently_ignored() {
        let mut net = Net::new();
        net.add_layer(opt(&[("type", "Input"), ("name", "x"), ("w", "1"), ("h", "1"), ("c", "1")]));
        net.compile(CompileMode::Initial).unwrap();

        let mut ext = net.create_extractor();
        let t = Tensor::zeros(&[1, 1, 1, 1], crate::dtype::ScalarType::Float).unwrap();
        assert!(matches!(ext.input("nope", t), Err(GPError::GraphError(_))));
        assert!(matches!(ext.extract("nope"), Err(GPError::GraphError(_))));
    }
}
