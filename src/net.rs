//! the graph builder. `Net` accumulates layer declarations via
//! `add_layer` (each one expanded in place into its fused batchnorm /
//! activation chain, if requested), then `compile` runs the consumer
//! census + auto-`Split` insertion pass and links everything into a flat
//! blob/layer list ready for an `Extractor` to walk.

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::blob::Blob;
use crate::config::LayerOption;
use crate::data_reader::{DataReader, InitializerFromDataReader};
use crate::error::{GPError, GPResult};
use crate::extractor::Extractor;
use crate::layer::registry::LayerRegistry;
use crate::layer::Layer;
use crate::param_dict::ParamDict;

#[derive(Debug, Clone, Copy)]
pub enum CompileMode {
    /// No weight stream follows; layers synthesize their own weights.
    Initial,
    /// `Net::load_weight` will be called after compile to fill them in.
    Deserialize,
}

#[derive(Debug, Clone, Copy)]
pub struct NetOption {
    /// Recycle bottom blobs once their last consumer has run, and prefer
    /// in-place forward where a layer supports it.
    pub lightmode: bool,
}

impl Default for NetOption {
    fn default() -> Self {
        NetOption { lightmode: true }
    }
}

pub struct Net {
    registry: LayerRegistry,
    pub option: NetOption,
    layer_options: Vec<LayerOption>,
    layers: Vec<Box<dyn Layer>>,
    blobs: Vec<Blob>,
}

fn split_names(field: &str) -> Vec<String> {
    field.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

impl Net {
    pub fn new() -> Self {
        Net {
            registry: LayerRegistry::new(),
            option: NetOption::default(),
            layer_options: Vec::new(),
            layers: Vec::new(),
            blobs: Vec::new(),
        }
    }

    pub fn with_option(option: NetOption) -> Self {
        let mut net = Net::new();
        net.option = option;
        net
    }

    pub fn registry_mut(&mut self) -> &mut LayerRegistry {
        &mut self.registry
    }

    pub fn blobs(&self) -> &[Blob] {
        &self.blobs
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn find_blob_index_by_name(&self, name: &str) -> Option<usize> {
        self.blobs.iter().position(|b| b.name == name)
    }

    pub fn input_blob_indexes(&self) -> Vec<usize> {
        self.blobs
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                b.producer >= 0 && self.layers[b.producer as usize].base().type_name == "Input"
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn output_blob_indexes(&self) -> Vec<usize> {
        self.blobs.iter().enumerate().filter(|(_, b)| b.consumer < 0).map(|(i, _)| i).collect()
    }

    /// Declares one layer. Name/input/output default exactly the way the
    /// reference graph builder does: name defaults to the decimal layer
    /// index, output defaults to name, input defaults to the previous
    /// layer's first output. A `batchnorm` option (any value) and/or an
    /// `activation` option (a registered layer type name, e.g. `"ReLU"`)
    /// expand this single declaration into a conv -> bn -> activation
    /// chain that still exposes `output` as its public name.
    pub fn add_layer(&mut self, mut option: LayerOption) {
        let idx = self.layer_options.len();
        let base_name = option.get("name").cloned().unwrap_or_else(|| idx.to_string());
        option.insert("name".to_string(), base_name.clone());

        if !option.contains_key("input") {
            if let Some(prev) = self.layer_options.last() {
                if let Some(prev_output) = prev.get("output") {
                    let first = split_names(prev_output).into_iter().next().unwrap_or_default();
                    option.insert("input".to_string(), first);
                }
            }
        }

        // Read, don't consume: the base layer's own `parse_param` (e.g.
        // Convolution's bias-suppression rule) still needs to see these
        // keys in its option map, so they stay in `option` when it's
        // pushed below.
        let has_bn = option.contains_key("batchnorm");
        let activation = option.get("activation").cloned();
        let eps = option.get("eps").cloned();
        let public_output = option.get("output").cloned().unwrap_or_else(|| base_name.clone());

        let mut current_output = public_output.clone();
        if has_bn || activation.is_some() {
            current_output = format!("{base_name}_conv");
        }
        option.insert("output".to_string(), current_output.clone());
        self.layer_options.push(option);

        if has_bn {
            let bn_output = if activation.is_some() {
                format!("{base_name}_bn")
            } else {
                public_output.clone()
            };
            let mut bn_option = LayerOption::new();
            bn_option.insert("type".to_string(), "BatchNormalization".to_string());
            bn_option.insert("name".to_string(), format!("bn_{base_name}"));
            bn_option.insert("input".to_string(), current_output.clone());
            bn_option.insert("output".to_string(), bn_output.clone());
            if let Some(eps) = eps {
                bn_option.insert("eps".to_string(), eps);
            }
            self.layer_options.push(bn_option);
            current_output = bn_output;
        }

        if let Some(act_type) = activation {
            let mut act_option = LayerOption::new();
            act_option.insert("type".to_string(), act_type);
            act_option.insert("name".to_string(), format!("act_{base_name}"));
            act_option.insert("input".to_string(), current_output);
            act_option.insert("output".to_string(), public_output);
            self.layer_options.push(act_option);
        }
    }

    /// Consumer census + auto-`Split` insertion. Always recomputed from
    /// `layer_options` rather than incrementally, so a second `compile`
    /// call after more `add_layer` calls never sees stale split state
    /// from the first run.
    fn build_graph(&self) -> GPResult<Vec<LayerOption>> {
        let mut work = self.layer_options.clone();
        let mut split_counter = 0usize;

        loop {
            let mut consumers: HashMap<String, Vec<usize>> = HashMap::new();
            for (i, opt) in work.iter().enumerate() {
                if let Some(input) = opt.get("input") {
                    for name in split_names(input) {
                        consumers.entry(name).or_default().push(i);
                    }
                }
            }

            let next = consumers.into_iter().find(|(_, c)| c.len() > 1);
            let Some((blob_name, consumer_indexes)) = next else {
                break;
            };

            let producer_idx = work
                .iter()
                .position(|o| o.get("output").map(|s| split_names(s).contains(&blob_name)).unwrap_or(false))
                .ok_or_else(|| GPError::GraphError(format!("blob `{blob_name}` has no producer")))?;

            let k = split_counter;
            split_counter += 1;
            let split_name = format!("auto_sp_{k}");
            let mut split_outputs = Vec::new();
            for j in 0..consumer_indexes.len() {
                split_outputs.push(format!("asp_{k}_{j}"));
            }

            for (j, &consumer_idx) in consumer_indexes.iter().enumerate() {
                let consumer = &mut work[consumer_idx];
                let rewritten = split_names(consumer.get("input").unwrap())
                    .into_iter()
                    .map(|n| if n == blob_name { split_outputs[j].clone() } else { n })
                    .collect::<Vec<_>>()
                    .join(",");
                consumer.insert("input".to_string(), rewritten);
            }

            let mut split_option = LayerOption::new();
            split_option.insert("type".to_string(), "Split".to_string());
            split_option.insert("name".to_string(), split_name);
            split_option.insert("input".to_string(), blob_name.clone());
            split_option.insert("output".to_string(), split_outputs.join(","));
            debug!(blob = %blob_name, fanout = consumer_indexes.len(), "inserting auto Split");
            work.insert(producer_idx + 1, split_option);
        }

        Ok(work)
    }

    #[instrument(skip(self))]
    pub fn compile(&mut self, mode: CompileMode) -> GPResult<()> {
        let work = self.build_graph()?;

        self.blobs.clear();
        self.layers.clear();
        let mut blob_index: HashMap<String, usize> = HashMap::new();

        for opt in &work {
            let type_name = opt.get("type").cloned().ok_or_else(|| GPError::BadOption {
                layer: opt.get("name").cloned().unwrap_or_default(),
                detail: "missing `type`".into(),
            })?;
            let name = opt.get("name").cloned().unwrap_or_default();

            let bottom_names = opt.get("input").map(|s| split_names(s)).unwrap_or_default();
            let top_names = opt.get("output").map(|s| split_names(s)).unwrap_or_default();
            let layer_idx = self.layers.len() as i32;

            let mut bottoms = Vec::with_capacity(bottom_names.len());
            for bname in &bottom_names {
                let idx = *blob_index.entry(bname.clone()).or_insert_with(|| {
                    self.blobs.push(Blob::new(bname.clone()));
                    self.blobs.len() - 1
                });
                self.blobs[idx].consumer = layer_idx;
                bottoms.push(idx as i32);
            }

            let mut tops = Vec::with_capacity(top_names.len());
            for tname in &top_names {
                let idx = *blob_index.entry(tname.clone()).or_insert_with(|| {
                    self.blobs.push(Blob::new(tname.clone()));
                    self.blobs.len() - 1
                });
                self.blobs[idx].producer = layer_idx;
                tops.push(idx as i32);
            }

            let mut layer = self.registry.create(&type_name)?;
            {
                let base = layer.base_mut();
                base.type_name = type_name.clone();
                base.name = name.clone();
                base.bottoms = bottoms.clone();
                base.tops = tops.clone();
                base.bottom_shapes = bottoms.iter().map(|&i| self.blobs[i as usize].shape.clone()).collect();
            }

            let mut pd = ParamDict::new();
            layer.parse_param(opt, &mut pd)?;
            layer.compute_output_shape(&mut pd)?;
            if tops.is_empty() {
                return Err(GPError::GraphError(format!("layer `{name}` declared no outputs")));
            }
            let shape = pd
                .get_tensor(crate::param_dict::OUTPUT_SHAPE_HINT)
                .ok_or_else(|| {
                    GPError::GraphError(format!("layer `{name}` did not set OUTPUT_SHAPE_HINT"))
                })?
                .as_slice_i64()?
                .to_vec();
            for &top_idx in &tops {
                self.blobs[top_idx as usize].shape = shape.clone();
            }
            layer.load_param(&pd)?;
            if matches!(mode, CompileMode::Initial) {
                layer.init_model()?;
            }

            self.layers.push(layer);
        }

        Ok(())
    }

    #[instrument(skip(self, reader))]
    pub fn load_weight(&mut self, reader: &mut dyn DataReader) -> GPResult<()> {
        let (major, minor) = crate::data_reader::read_version_banner(reader)?;
        info!("Model: v{}.{}", major, minor);
        for layer in &mut self.layers {
            let name = layer.base().name.clone();
            let mut init = InitializerFromDataReader::new(reader);
            layer.load_model(&mut init).map_err(|e| GPError::WeightMismatch {
                layer: name,
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn create_extractor(&self) -> Extractor<'_> {
        Extractor::new(self)
    }
}

impl Default for Net {
    fn default() -> Self {
        Net::new()
    }
}
