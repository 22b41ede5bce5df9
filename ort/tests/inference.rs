//! Session-level tests against the reference engine. Models are built in
//! code and, where a path is needed, written to a temp directory.

use std::sync::{Arc, Barrier};

use giztoy_ort::compare::{compare_values, Tolerance};
use giztoy_ort::reference::{DimSpec, GraphDocument, TypeSpec};
use giztoy_ort::{
    ElementType, Env, ErrorCode, ExecutionMode, ExecutionProvider, GraphOptimizationLevel, LogLevel, MapValue,
    NamedValue, OrtError, RunOptions, Session, SessionOptions, Tensor, Value, ValueKind,
};
use once_cell::sync::Lazy;

static ENV: Lazy<Env> = Lazy::new(|| Env::reference("inference-test"));

fn image_model() -> GraphDocument {
    GraphDocument::new("image_identity")
        .input("data_0", TypeSpec::fixed(ElementType::Float, &[1, 3, 224, 224]))
        .output("softmaxout_1", TypeSpec::fixed(ElementType::Float, &[1, 3, 224, 224]))
        .identity("data_0", "softmaxout_1")
}

fn image_input() -> Tensor {
    let data: Vec<f32> = (0..3 * 224 * 224).map(|i| (i % 997) as f32 / 997.0).collect();
    Tensor::new(&[1, 3, 224, 224], data).unwrap()
}

fn load(doc: &GraphDocument) -> Session {
    ENV.new_session(&doc.to_bytes()).unwrap()
}

#[test]
fn runs_inference_on_a_model() {
    let session = load(&image_model());
    let input = image_input();
    let out = session
        .run(&[NamedValue::from_tensor("data_0", input.clone())])
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name(), "softmaxout_1");
    compare_values(&Value::Tensor(input), out[0].value(), Tolerance::default()).unwrap();
}

#[test]
fn session_from_path_matches_session_from_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    image_model().write_file(&path).unwrap();

    let from_path = ENV.session_from_file(&path, &SessionOptions::new()).unwrap();
    let from_bytes = ENV.new_session(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(from_path.input_metadata(), from_bytes.input_metadata());
    assert_eq!(from_path.output_metadata(), from_bytes.output_metadata());

    let feed = [NamedValue::from_tensor("data_0", image_input())];
    assert_eq!(from_path.run(&feed).unwrap(), from_bytes.run(&feed).unwrap());
}

#[test]
fn input_and_output_metadata() {
    let session = load(&image_model());
    let input = &session.input_metadata()["data_0"];
    assert!(input.is_tensor());
    assert_eq!(input.element_type(), Some(ElementType::Float));
    assert_eq!(input.dimensions(), &[1, 3, 224, 224]);
    let output = &session.output_metadata()["softmaxout_1"];
    assert_eq!(output.kind(), ValueKind::Tensor);
    assert!(session.overridable_initializer_metadata().is_empty());
}

#[test]
fn symbolic_dimensions() {
    let doc = GraphDocument::new("capi_symbolic_dims")
        .input(
            "A",
            TypeSpec::tensor(
                ElementType::Float,
                vec![DimSpec::Symbolic("n".into()), DimSpec::Fixed(2)],
            ),
        )
        .input(
            "B",
            TypeSpec::tensor(ElementType::Float, vec![DimSpec::Symbolic("m".into())]),
        )
        .output("C", TypeSpec::tensor(ElementType::Float, vec![DimSpec::Unknown]))
        .identity("B", "C");
    let session = load(&doc);

    let a = &session.input_metadata()["A"];
    assert_eq!(a.dimensions(), &[-1, 2]);
    assert_eq!(a.symbolic_dimensions(), &["n".to_string(), String::new()]);
    let b = &session.input_metadata()["B"];
    assert_eq!(b.dimensions(), &[-1]);
    assert_eq!(b.symbolic_dimensions(), &["m".to_string()]);
    let c = &session.output_metadata()["C"];
    assert_eq!(c.dimensions(), &[-1]);
    assert_eq!(c.symbolic_dimensions(), &[String::new()]);

    // Dynamic dimensions accept any size.
    let out = session
        .run(&[
            NamedValue::from_tensor("A", Tensor::new(&[3, 2], vec![0.0f32; 6]).unwrap()),
            NamedValue::from_tensor("B", Tensor::new(&[4], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap()),
        ])
        .unwrap();
    assert_eq!(out[0].as_tensor().unwrap().shape(), &[4]);
}

#[test]
fn wrong_input_name() {
    let session = load(&image_model());
    let err = session
        .run(&[NamedValue::from_tensor("wrong_name", image_input())])
        .unwrap_err();
    assert!(err.is_invalid_input_name());
    assert!(err.to_string().contains("[ErrorCode:InvalidArgument]"));
}

#[test]
fn extra_input() {
    let session = load(&image_model());
    let err = session
        .run(&[
            NamedValue::from_tensor("data_0", image_input()),
            NamedValue::from_tensor("extra", image_input()),
        ])
        .unwrap_err();
    assert!(matches!(err, OrtError::InvalidInputName(ref n) if n == "extra"));
    assert!(err.to_string().contains("Invalid Feed Input Name"));
}

#[test]
fn wrong_input_type() {
    let session = load(&image_model());
    let ints = Tensor::new(&[1, 3, 224, 224], vec![1i32; 3 * 224 * 224]).unwrap();
    let err = session
        .run(&[NamedValue::from_tensor("data_0", ints)])
        .unwrap_err();
    assert!(matches!(err, OrtError::InvalidInputType { .. }));
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(err.to_string().contains("tensor(int32)"));
}

#[test]
fn wrong_input_shape() {
    let session = load(&image_model());
    let small = Tensor::new(&[1, 3, 10, 10], vec![0.0f32; 300]).unwrap();
    let err = session
        .run(&[NamedValue::from_tensor("data_0", small)])
        .unwrap_err();
    assert!(matches!(err, OrtError::InvalidInputShape { ref expected, .. } if expected == &[1, 3, 224, 224]));
}

#[test]
fn sequence_fed_to_tensor_input() {
    let session = load(&image_model());
    let err = session
        .run(&[NamedValue::new("data_0", Value::Sequence(vec![]))])
        .unwrap_err();
    assert!(matches!(err, OrtError::InvalidInputType { .. }));
}

fn roundtrip_model(elem: ElementType) -> GraphDocument {
    GraphDocument::new(format!("test_types_{elem}"))
        .input("input", TypeSpec::fixed(elem, &[1, 5]))
        .output("output", TypeSpec::fixed(elem, &[1, 5]))
        .identity("input", "output")
}

fn assert_roundtrip(tensor: Tensor) {
    let session = load(&roundtrip_model(tensor.element_type()));
    let out = session
        .run(&[NamedValue::from_tensor("input", tensor.clone())])
        .unwrap();
    let got = out.get("output").unwrap().as_tensor().unwrap();
    assert_eq!(got, &tensor, "{} did not round-trip", tensor.element_type());
}

#[test]
fn all_supported_types_roundtrip() {
    let shape = [1, 5];
    assert_roundtrip(Tensor::new(&shape, vec![1.5f32, -0.0, f32::MAX, f32::MIN_POSITIVE, 3.25]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![1.5f64, -2.0, f64::MAX, 1e-300, 0.1]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![i8::MIN, -1, 0, 1, i8::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![i16::MIN, -1, 0, 1, i16::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![i32::MIN, -1, 0, 1, i32::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![i64::MIN, -1, 0, 1, i64::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![0u8, 1, 127, 128, u8::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![0u16, 1, 2, 3, u16::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![0u32, 1, 2, 3, u32::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![0u64, 1, 2, 3, u64::MAX]).unwrap());
    assert_roundtrip(Tensor::new(&shape, vec![true, false, true, true, false]).unwrap());
    assert_roundtrip(
        Tensor::new(
            &shape,
            ["a", "", "snow", "日本語", "x y"].map(String::from).to_vec(),
        )
        .unwrap(),
    );
}

#[test]
fn unsupported_initializer_type_fails_load() {
    let mut doc = GraphDocument::new("half")
        .input("x", TypeSpec::fixed(ElementType::Float, &[1]))
        .output("x", TypeSpec::fixed(ElementType::Float, &[1]));
    let one = Tensor::new(&[1], vec![0u16]).unwrap();
    doc = doc.initializer("h", &one, false);
    doc.initializers[0].tensor.data_type = ElementType::Float16.tag();
    let err = ENV.new_session(&doc.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidGraph);
    assert!(err.to_string().contains("float16"));
}

fn overridable_initializer_model() -> GraphDocument {
    GraphDocument::new("overridable_initializer")
        .input("Label", TypeSpec::fixed(ElementType::Bool, &[1, 1]))
        .input("F2", TypeSpec::fixed(ElementType::String, &[1, 1]))
        .initializer("F1", &Tensor::new(&[1, 1], vec![4.0f32]).unwrap(), true)
        .output("Label0", TypeSpec::fixed(ElementType::Bool, &[1, 1]))
        .output("F20", TypeSpec::fixed(ElementType::String, &[1, 1]))
        .output("F11", TypeSpec::fixed(ElementType::Float, &[1, 1]))
        .identity("Label", "Label0")
        .identity("F2", "F20")
        .identity("F1", "F11")
}

#[test]
fn overridable_initializer() {
    let session = load(&overridable_initializer_model());
    let meta = session.overridable_initializer_metadata();
    assert_eq!(meta.len(), 1);
    assert_eq!(meta["F1"].element_type(), Some(ElementType::Float));
    assert_eq!(meta["F1"].dimensions(), &[1, 1]);

    let base = vec![
        NamedValue::from_tensor("Label", Tensor::new(&[1, 1], vec![true]).unwrap()),
        NamedValue::from_tensor("F2", Tensor::new(&[1, 1], vec!["f2_string".to_string()]).unwrap()),
    ];

    let out = session.run(&base).unwrap();
    assert_eq!(out.get("F11").unwrap().as_tensor().unwrap().to_vec::<f32>().unwrap(), vec![4.0]);

    let mut overridden = base.clone();
    overridden.push(NamedValue::from_tensor("F1", Tensor::new(&[1, 1], vec![2.0f32]).unwrap()));
    let out = session.run(&overridden).unwrap();
    assert_eq!(out.get("Label0").unwrap().as_tensor().unwrap().to_vec::<bool>().unwrap(), vec![true]);
    assert_eq!(
        out.get("F20").unwrap().as_tensor().unwrap().to_vec::<String>().unwrap(),
        vec!["f2_string".to_string()]
    );
    assert_eq!(out.get("F11").unwrap().as_tensor().unwrap().to_vec::<f32>().unwrap(), vec![2.0]);

    // Overrides are type-checked like inputs.
    let mut wrong = base;
    wrong.push(NamedValue::from_tensor("F1", Tensor::new(&[1, 1], vec![2i64]).unwrap()));
    assert!(matches!(session.run(&wrong), Err(OrtError::InvalidInputType { .. })));
}

#[test]
fn sequence_of_maps_output() {
    let probs = Value::Sequence(vec![Value::Map(
        MapValue::from_entries(vec![(0i64, 0.25938290f32), (1, 0.40904793), (2, 0.33156919)]).unwrap(),
    )]);
    let string_probs = Value::Sequence(vec![Value::Map(
        MapValue::from_entries(vec![
            ("0".to_string(), 0.25938290f32),
            ("1".to_string(), 0.40904793),
            ("2".to_string(), 0.33156919),
        ])
        .unwrap(),
    )]);
    let doc = GraphDocument::new("test_sequence_map")
        .input("input", TypeSpec::fixed(ElementType::Float, &[1, 2]))
        .constant("label", &Value::Tensor(Tensor::new(&[1], vec![1i64]).unwrap()))
        .constant("probs_int", &probs)
        .constant("probs_string", &string_probs)
        .output("label", TypeSpec::fixed(ElementType::Int64, &[1]))
        .output(
            "probabilities",
            TypeSpec::Sequence {
                elem: Box::new(TypeSpec::Map {
                    key: ElementType::Int64,
                    value: Box::new(TypeSpec::fixed(ElementType::Float, &[])),
                }),
            },
        )
        .output(
            "probabilities_str",
            TypeSpec::Sequence {
                elem: Box::new(TypeSpec::Map {
                    key: ElementType::String,
                    value: Box::new(TypeSpec::fixed(ElementType::Float, &[])),
                }),
            },
        )
        .identity("probs_int", "probabilities")
        .identity("probs_string", "probabilities_str");
    let session = load(&doc);
    assert_eq!(session.output_metadata()["probabilities"].kind(), ValueKind::Sequence);
    assert_eq!(session.output_metadata()["probabilities"].element_type(), None);

    let feed = [NamedValue::from_tensor("input", Tensor::new(&[1, 2], vec![5.8f32, 2.8]).unwrap())];
    let out = session.run(&feed).unwrap();

    assert_eq!(out.get("label").unwrap().as_tensor().unwrap().to_vec::<i64>().unwrap(), vec![1]);

    let seq = out.get("probabilities").unwrap().as_sequence().unwrap();
    assert_eq!(seq.len(), 1);
    let map = seq[0].as_map().unwrap().to_hash_map::<i64, f32>().unwrap();
    assert!((map[&0] - 0.25938290).abs() < 1e-6);
    assert!((map[&1] - 0.40904793).abs() < 1e-6);
    assert!((map[&2] - 0.33156919).abs() < 1e-6);

    let seq = out.get("probabilities_str").unwrap().as_sequence().unwrap();
    let map = seq[0].as_map().unwrap().to_hash_map::<String, f32>().unwrap();
    assert!((map["1"] - 0.40904793).abs() < 1e-6);
}

#[test]
fn concurrent_runs_match() {
    let session = Arc::new(load(&image_model()));
    let input = image_input();
    let expected = session
        .run(&[NamedValue::from_tensor("data_0", input.clone())])
        .unwrap();

    std::thread::scope(|s| {
        for _ in 0..10 {
            let session = Arc::clone(&session);
            let input = input.clone();
            let expected = &expected;
            s.spawn(move || {
                for _ in 0..10 {
                    let out = session
                        .run(&[NamedValue::from_tensor("data_0", input.clone())])
                        .unwrap();
                    compare_values(expected[0].value(), out[0].value(), Tolerance::default()).unwrap();
                }
            });
        }
    });
}

#[test]
fn terminate_flag() {
    let session = load(&image_model());
    let feed = [NamedValue::from_tensor("data_0", image_input())];
    let mut run_options = RunOptions::new();
    run_options.set_log_id("terminate-test").set_log_level(LogLevel::Error);

    run_options.set_terminate(true);
    let err = session.run_with(&feed, None, Some(&run_options)).unwrap_err();
    assert!(matches!(err, OrtError::Terminated));
    assert_eq!(err.code(), ErrorCode::Fail);

    run_options.set_terminate(false);
    let out = session.run_with(&feed, None, Some(&run_options)).unwrap();
    assert_eq!(out.len(), 1);
}

fn identity_chain(len: usize) -> GraphDocument {
    let mut doc = GraphDocument::new("identity_chain")
        .input("x", TypeSpec::fixed(ElementType::Float, &[4]))
        .output("y", TypeSpec::fixed(ElementType::Float, &[4]));
    let mut prev = "x".to_string();
    for i in 0..len {
        let next = if i + 1 == len { "y".to_string() } else { format!("v{i}") };
        doc = doc.identity(&prev, &next);
        prev = next;
    }
    doc
}

#[test]
fn terminate_during_run() {
    let session = load(&identity_chain(20_000));
    let x = Tensor::new(&[4], vec![1.0f32, -2.0, 3.5, 0.0]).unwrap();
    let feed = [NamedValue::from_tensor("x", x.clone())];

    for _ in 0..20 {
        let run_options = RunOptions::new();
        let start = Barrier::new(2);
        let result = std::thread::scope(|scope| {
            scope.spawn(|| {
                start.wait();
                std::thread::yield_now();
                run_options.set_terminate(true);
            });
            start.wait();
            session.run_with(&feed, None, Some(&run_options))
        });
        // Either the flag landed mid-run and nothing is returned, or the run
        // finished first and every output is complete.
        match result {
            Err(OrtError::Terminated) => {}
            Ok(out) => {
                assert_eq!(out.len(), 1);
                assert_eq!(out[0].name(), "y");
                assert_eq!(out[0].as_tensor().unwrap(), &x);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert!(run_options.terminate());

        run_options.set_terminate(false);
        let out = session.run_with(&feed, None, Some(&run_options)).unwrap();
        assert_eq!(out[0].as_tensor().unwrap(), &x);
    }
}

#[test]
fn runs_across_optimization_levels_and_execution_modes() {
    let input = image_input();
    let feed = [NamedValue::from_tensor("data_0", input.clone())];
    for level in [GraphOptimizationLevel::DisableAll, GraphOptimizationLevel::EnableExtended] {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let mut options = SessionOptions::new();
            options.set_graph_optimization_level(level).set_execution_mode(mode);
            let session = ENV.session_from_memory(&image_model().to_bytes(), &options).unwrap();
            let out = session.run(&feed).unwrap();
            assert_eq!(out.len(), 1, "{level:?}/{mode:?}");
            assert_eq!(out[0].name(), "softmaxout_1");
            compare_values(&Value::Tensor(input.clone()), out[0].value(), Tolerance::default())
                .unwrap_or_else(|e| panic!("{level:?}/{mode:?}: {e}"));
        }
    }
}

#[test]
fn output_metadata_agrees_with_produced_shapes() {
    let doc = GraphDocument::new("shapes")
        .input("x", TypeSpec::fixed(ElementType::Float, &[-1, 3]))
        .output("y", TypeSpec::fixed(ElementType::Float, &[2, 3]))
        .identity("x", "y");
    let session = load(&doc);
    assert_eq!(session.output_metadata()["y"].dimensions(), &[2, 3]);

    let conflicting = GraphDocument::new("shapes")
        .input("x", TypeSpec::fixed(ElementType::Float, &[-1, 3]))
        .output("y", TypeSpec::fixed(ElementType::Float, &[2, 4]))
        .identity("x", "y");
    let err = ENV.new_session(&conflicting.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidGraph);
}

#[test]
fn run_options_apply_per_call() {
    let session = load(&image_model());
    let feed = [NamedValue::from_tensor("data_0", image_input())];
    let mut a = RunOptions::new();
    a.set_log_id("a");
    let b = a.clone();
    a.set_terminate(true);
    assert!(session.run_with(&feed, None, Some(&a)).is_err());
    assert!(session.run_with(&feed, None, Some(&b)).is_ok());
}

#[test]
fn profiling_writes_trace() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/Ort_P_", dir.path().display());
    let mut options = SessionOptions::new();
    options.set_enable_profiling(true).set_profile_output_prefix(prefix.as_str());

    let session = ENV.session_from_memory(&image_model().to_bytes(), &options).unwrap();
    let feed = [NamedValue::from_tensor("data_0", image_input())];
    session.run(&feed).unwrap();
    session.run(&feed).unwrap();

    let path = session.end_profiling().unwrap().unwrap();
    assert!(path.to_string_lossy().starts_with(&prefix));
    let events: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let runs = events.iter().filter(|e| e["name"] == "model_run").count();
    assert_eq!(runs, 2);
    assert!(events.iter().any(|e| e["name"] == "model_loading"));

    assert!(session.end_profiling().unwrap().is_none());
}

#[test]
fn profiling_disabled_by_default() {
    let session = load(&image_model());
    assert!(session.end_profiling().unwrap().is_none());
}

#[test]
fn optimized_model_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let optimized = dir.path().join("optimized-model.onnx");
    let mut options = SessionOptions::new();
    options
        .set_graph_optimization_level(GraphOptimizationLevel::EnableExtended)
        .set_optimized_model_path(&optimized);

    let doc = image_model()
        .constant("dead", &Value::Tensor(Tensor::new(&[1], vec![0i8]).unwrap()))
        .identity("data_0", "unused");
    let session = ENV.session_from_memory(&doc.to_bytes(), &options).unwrap();
    assert_eq!(session.options().optimized_model_path(), Some(optimized.as_path()));

    let written = GraphDocument::parse(&std::fs::read(&optimized).unwrap()).unwrap();
    assert!(written.constants.is_empty());
    assert_eq!(written.nodes.len(), 1);
    // The written model loads and behaves the same.
    let reloaded = ENV.session_from_file(&optimized, &SessionOptions::new()).unwrap();
    assert_eq!(reloaded.output_metadata(), session.output_metadata());
}

#[test]
fn session_options_from_yaml() {
    let yaml = r#"
execution_mode: parallel
enable_memory_pattern: false
log_id: yaml-session
log_level: warning
inter_op_num_threads: 2
execution_providers:
  - kind: cuda
    device_id: 0
  - kind: cpu
    use_arena: false
"#;
    let options: SessionOptions = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        options.execution_providers(),
        &[ExecutionProvider::Cuda { device_id: 0 }, ExecutionProvider::Cpu { use_arena: false }]
    );
    let session = ENV.session_from_memory(&image_model().to_bytes(), &options).unwrap();
    assert_eq!(session.options().log_id(), "yaml-session");
    assert!(!session.options().enable_memory_pattern());
}

#[test]
fn negative_thread_count_from_config_is_rejected() {
    let options: SessionOptions = serde_json::from_str(r#"{"intra_op_num_threads": -3}"#).unwrap();
    let err = ENV.session_from_memory(&image_model().to_bytes(), &options).unwrap_err();
    assert!(matches!(err, OrtError::InvalidOption(_)));
}

#[test]
fn model_load_errors() {
    let err = ENV
        .session_from_file("/definitely/not/here.onnx", &SessionOptions::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchFile);

    let err = ENV.new_session(b"\x08\x03\x12\x04onnx").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidProtobuf);

    let err = ENV.new_session(&[]).unwrap_err();
    assert!(matches!(err, OrtError::EmptyData));

    let conv = image_model().node("Conv", &["data_0"], &["conv_out"]);
    let err = ENV.new_session(&conv.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotImplemented);
    assert!(err.to_string().contains("Could not find an implementation"));
}
