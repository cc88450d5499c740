//! End-to-end scenarios for the inference graph: a tiny convolution net
//! computed by hand, a fused batchnorm+activation chain, auto-Split
//! insertion for a fan-out blob, the weight-stream version banner, and
//! name-vs-index extraction parity.

use std::collections::HashSet;

use nnlite::config::LayerOption;
use nnlite::data_reader::DataReaderFromStdio;
use nnlite::net::{CompileMode, Net};
use nnlite::tensor::Tensor;

fn opt(pairs: &[(&str, &str)]) -> LayerOption {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn version_banner_bytes(weights: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.extend_from_slice(&0i32.to_le_bytes());
    for w in weights {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}

fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
    });
}

#[test]
fn tiny_conv_net_matches_hand_computed_output() {
    init_tracing();
    let mut net = Net::new();
    net.add_layer(opt(&[("type", "Input"), ("name", "data"), ("w", "3"), ("h", "3"), ("c", "1")]));
    net.add_layer(opt(&[
        ("type", "Convolution"),
        ("name", "conv"),
        ("kernel", "3"),
        ("num_output", "1"),
        ("pad", "0"),
        ("stride", "1"),
        ("bias_term", "false"),
    ]));
    net.compile(CompileMode::Deserialize).unwrap();

    let weights = vec![1.0f32 / 9.0; 9];
    let mut reader = DataReaderFromStdio::new(std::io::Cursor::new(version_banner_bytes(&weights)));
    net.load_weight(&mut reader).unwrap();

    let mut ext = net.create_extractor();
    let input = Tensor::from_f32_slice(
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        &[1, 1, 3, 3],
    )
    .unwrap();
    ext.input("data", input).unwrap();
    let out = ext.extract("conv").unwrap();

    assert_eq!(out.sizes(), &[1, 1, 1, 1]);
    assert!((out.as_slice_f32().unwrap()[0] - 5.0).abs() < 1e-6);
}

#[test]
fn fused_batchnorm_activation_zeroes_negative_input() {
    init_tracing();
    let mut net = Net::new();
    net.add_layer(opt(&[("type", "Input"), ("name", "data"), ("w", "2"), ("h", "1"), ("c", "1")]));
    net.add_layer(opt(&[
        ("type", "Convolution"),
        ("name", "conv1"),
        ("kernel", "1"),
        ("num_output", "1"),
        ("pad", "0"),
        ("stride", "1"),
        ("batchnorm", "1"),
        ("activation", "ReLU"),
    ]));
    net.compile(CompileMode::Deserialize).unwrap();

    let type_names: Vec<&str> =
        net.layers().iter().map(|l| l.base().type_name.as_str()).collect();
    assert_eq!(type_names, vec!["Input", "Convolution", "BatchNormalization", "ReLU"]);

    // Convolution: bias_term defaults to false with a fused batchnorm, so
    // only the 1x1x1x1 weight is read. BatchNormalization then reads
    // gamma/beta/running_mean/running_var (length == channels == 1),
    // seeded here to the identity transform.
    let mut reader = DataReaderFromStdio::new(std::io::Cursor::new(version_banner_bytes(&[
        1.0, // conv weight
        1.0, // gamma
        0.0, // beta
        0.0, // running_mean
        1.0, // running_var
    ])));
    net.load_weight(&mut reader).unwrap();

    let mut ext = net.create_extractor();
    let input = Tensor::from_f32_slice(&[-1.0, -2.0], &[1, 1, 1, 2]).unwrap();
    ext.input("data", input).unwrap();
    let out = ext.extract("conv1").unwrap();

    assert_eq!(out.as_slice_f32().unwrap(), &[0.0, 0.0]);
}

#[test]
fn auto_split_inserted_for_multi_consumer_blob() {
    init_tracing();
    let mut net = Net::new();
    net.add_layer(opt(&[("type", "Input"), ("name", "a"), ("w", "2"), ("h", "2"), ("c", "1")]));
    net.add_layer(opt(&[("type", "ReLU"), ("name", "b"), ("input", "a")]));
    net.add_layer(opt(&[("type", "ReLU"), ("name", "c"), ("input", "a")]));
    net.add_layer(opt(&[("type", "ReLU"), ("name", "d"), ("input", "a")]));
    net.compile(CompileMode::Initial).unwrap();

    let split = net
        .layers()
        .iter()
        .find(|l| l.base().name == "auto_sp_0")
        .expect("an auto-generated Split must be inserted");
    assert_eq!(split.base().type_name, "Split");
    assert_eq!(split.base().bottoms.len(), 1);
    assert_eq!(net.blobs()[split.base().bottoms[0] as usize].name, "a");
    assert_eq!(split.base().tops.len(), 3);

    let split_outputs: HashSet<String> =
        split.base().tops.iter().map(|&i| net.blobs()[i as usize].name.clone()).collect();
    assert_eq!(split_outputs.len(), 3, "the three Split outputs must be distinct blobs");

    for consumer_name in ["b", "c", "d"] {
        let consumer = net.layers().iter().find(|l| l.base().name == consumer_name).unwrap();
        let bottom_name = &net.blobs()[consumer.base().bottoms[0] as usize].name;
        assert!(
            split_outputs.contains(bottom_name),
            "{consumer_name} should read one of the Split's outputs, not the original blob"
        );
    }
}

#[test]
fn version_banner_is_consumed_before_layer_weights() {
    init_tracing();
    let mut net = Net::new();
    net.add_layer(opt(&[("type", "Input"), ("name", "data"), ("w", "1"), ("h", "1"), ("c", "1")]));
    net.compile(CompileMode::Deserialize).unwrap();

    // Input has no weights of its own, so a stream holding exactly the
    // 8-byte banner and nothing else must load cleanly.
    let bytes: [u8; 8] = [0x01, 0, 0, 0, 0x02, 0, 0, 0];
    let mut reader = DataReaderFromStdio::new(std::io::Cursor::new(bytes));
    net.load_weight(&mut reader).unwrap();
}

#[test]
fn extract_by_name_matches_extract_by_index_and_is_idempotent() {
    init_tracing();
    let mut net = Net::new();
    net.add_layer(opt(&[("type", "Input"), ("name", "data"), ("w", "2"), ("h", "2"), ("c", "1")]));
    net.add_layer(opt(&[("type", "ReLU"), ("name", "prob")]));
    net.compile(CompileMode::Initial).unwrap();

    let prob_idx = net.find_blob_index_by_name("prob").unwrap();
    let sample = [-1.0, 2.0, -3.0, 4.0];

    let mut ext = net.create_extractor();
    ext.input("data", Tensor::from_f32_slice(&sample, &[1, 1, 2, 2]).unwrap()).unwrap();
    let by_name = ext.extract("prob").unwrap();

    ext.clear();
    ext.input("data", Tensor::from_f32_slice(&sample, &[1, 1, 2, 2]).unwrap()).unwrap();
    let by_index = ext.extract_by_index(prob_idx).unwrap();

    assert_eq!(by_name.as_slice_f32().unwrap(), by_index.as_slice_f32().unwrap());
    assert_eq!(by_name.as_slice_f32().unwrap(), &[0.0, 2.0, 0.0, 4.0]);
}

/// A custom `eps` on the fused-batchnorm option must reach the synthesized
/// `BatchNormalization` layer, not just get silently dropped by the fusion
/// rewrite.
#[test]
fn custom_eps_propagates_to_synthesized_batchnorm() {
    init_tracing();
    let mut net = Net::new();
    net.add_layer(opt(&[("type", "Input"), ("name", "data"), ("w", "1"), ("h", "1"), ("c", "1")]));
    net.add_layer(opt(&[
        ("type", "Convolution"),
        ("name", "conv1"),
        ("kernel", "1"),
        ("num_output", "1"),
        ("batchnorm", "1"),
        ("eps", "1.0"),
    ]));
    net.compile(CompileMode::Deserialize).unwrap();

    let mut reader = DataReaderFromStdio::new(std::io::Cursor::new(version_banner_bytes(&[
        1.0, // conv weight (identity)
        2.0, // gamma
        0.0, // beta
        0.0, // running_mean
        3.0, // running_var
    ])));
    net.load_weight(&mut reader).unwrap();

    let mut ext = net.create_extractor();
    ext.input("data", Tensor::from_f32_slice(&[10.0], &[1, 1, 1, 1]).unwrap()).unwrap();
    let out = ext.extract("conv1").unwrap();

    // scale = gamma / sqrt(running_var + eps) = 2 / sqrt(3 + 1) = 1.0
    assert!((out.as_slice_f32().unwrap()[0] - 10.0).abs() < 1e-4);
}
