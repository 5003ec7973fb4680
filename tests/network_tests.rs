//! Network compilation, variables, request limits and metrics

mod common;

use std::sync::Arc;

use common::{add_builder, add_network, binary, iota, SHAPE};
use snippetforge::codegen::{
    CodegenResult, CompileArgs, CompiledKernel, KernelError, KernelGenerator,
};
use snippetforge::layout::ElementType;
use snippetforge::request::{HostTensor, StatusCode, Tensor};
use snippetforge::runtime::{
    CompiledNetwork, ConfigError, GeneratorRegistry, NetworkBuilder, PortKind, RuntimeConfig,
};
use snippetforge::subgraph::Op;
use snippetforge::{ProfilingStatus, SnippetForgeError, TensorDesc};

fn host(data: &[f32]) -> Tensor {
    HostTensor::from_f32(&SHAPE, data).unwrap().into()
}

/// `acc += x` through a ReadValue / Subgraph / Assign chain.
fn accumulator() -> Arc<CompiledNetwork> {
    let desc = TensorDesc::f32(&SHAPE);
    let initial = HostTensor::from_f32(&SHAPE, &[1.0; 16]).unwrap();
    let builder = NetworkBuilder::new("accumulate")
        .input("x", desc.clone())
        .intermediate("state", desc.clone())
        .output("sum", desc.clone())
        .variable("acc", initial)
        .read_value("read_acc", "acc", "state")
        .subgraph("add0", binary("add", Op::Add, &desc), &["x", "state"], &["sum"])
        .assign("write_acc", "sum", "acc");
    CompiledNetwork::compile(builder, &GeneratorRegistry::with_defaults(), RuntimeConfig::default())
        .unwrap()
}

#[test]
fn test_variables_carry_state_between_runs() {
    let network = accumulator();
    let request = network.create_infer_request().unwrap();
    request.set_tensor("x", host(&[2.0; 16])).unwrap();

    request.infer().unwrap();
    request.infer().unwrap();
    assert_eq!(request.get_tensor("sum").unwrap().to_f32_vec().unwrap()[0], 5.0);

    let states = request.query_state().unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name(), "acc");
    assert_eq!(states[0].state().unwrap().to_f32_vec().unwrap(), vec![5.0; 16]);

    states[0].set_state(&host(&[10.0; 16])).unwrap();
    request.infer().unwrap();
    assert_eq!(request.get_tensor("sum").unwrap().to_f32_vec().unwrap()[3], 12.0);

    states[0].reset().unwrap();
    request.infer().unwrap();
    assert_eq!(request.get_tensor("sum").unwrap().to_f32_vec().unwrap()[3], 3.0);
}

#[test]
fn test_requests_have_independent_variables() {
    let network = accumulator();
    let first = network.create_infer_request().unwrap();
    let second = network.create_infer_request().unwrap();
    first.set_tensor("x", host(&[1.0; 16])).unwrap();

    first.infer().unwrap();
    first.infer().unwrap();
    second.infer().unwrap();

    let first_acc = first.query_state().unwrap()[0].state().unwrap();
    let second_acc = second.query_state().unwrap()[0].state().unwrap();
    assert_eq!(first_acc.to_f32_vec().unwrap()[0], 3.0);
    assert_eq!(second_acc.to_f32_vec().unwrap()[0], 1.0);
}

#[test]
fn test_chained_subgraphs_through_intermediate_port() {
    let desc = TensorDesc::f32(&SHAPE);
    let builder = NetworkBuilder::new("chain")
        .input("a", desc.clone())
        .input("b", desc.clone())
        .intermediate("ab", desc.clone())
        .output("out", desc.clone())
        .subgraph("mul0", binary("mul", Op::Mul, &desc), &["a", "b"], &["ab"])
        .optimized_out("reshape0", "Reshape")
        .subgraph("add0", binary("add", Op::Add, &desc), &["ab", "a"], &["out"]);
    let network = CompiledNetwork::compile(
        builder,
        &GeneratorRegistry::with_defaults(),
        RuntimeConfig::default(),
    )
    .unwrap();
    assert_eq!(network.port_names(PortKind::Intermediate), vec!["ab"]);
    assert!(network.schedule("mul0").is_some());
    assert!(network.schedule("reshape0").is_none());

    let request = network.create_infer_request().unwrap();
    let a = iota(16);
    request.set_tensor("a", host(&a)).unwrap();
    request.set_tensor("b", host(&[3.0; 16])).unwrap();
    request.infer().unwrap();

    let out = request.get_tensor("out").unwrap().to_f32_vec().unwrap();
    assert_eq!(out, a.iter().map(|v| v * 3.0 + v).collect::<Vec<_>>());

    let info = request.get_profiling_info().unwrap();
    let statuses: Vec<ProfilingStatus> = info.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProfilingStatus::Executed,
            ProfilingStatus::OptimizedOut,
            ProfilingStatus::Executed
        ]
    );
    assert_eq!(info[1].node_type, "Reshape");
}

#[test]
fn test_collapse_follows_network_pool_size() {
    let desc = TensorDesc::f32(&[2, 2, 3, 4]);
    let compile = |threads: usize| {
        let builder = NetworkBuilder::new("dense")
            .input("x", desc.clone())
            .input("y", desc.clone())
            .output("z", desc.clone())
            .subgraph("add0", binary("add", Op::Add, &desc), &["x", "y"], &["z"]);
        CompiledNetwork::compile(
            builder,
            &GeneratorRegistry::with_defaults(),
            RuntimeConfig::default().with_num_threads(threads),
        )
        .unwrap()
    };

    let single = compile(1);
    let schedule = single.schedule("add0").unwrap();
    assert_eq!(schedule.collapsed_dims, 3);
    assert_eq!(schedule.domain, vec![1, 1, 1, 1, 1, 48]);

    // Eight workers need the outer dims kept for partitioning.
    let wide = compile(8);
    assert_eq!(wide.schedule("add0").unwrap().collapsed_dims, 0);

    let request = single.create_infer_request().unwrap();
    let x = iota(48);
    let ones = vec![1.0f32; 48];
    request
        .set_input([
            ("x", Tensor::from(HostTensor::from_f32(&[2, 2, 3, 4], &x).unwrap())),
            ("y", Tensor::from(HostTensor::from_f32(&[2, 2, 3, 4], &ones).unwrap())),
        ])
        .unwrap();
    request.infer().unwrap();
    let z = request.get_tensor("z").unwrap().to_f32_vec().unwrap();
    assert_eq!(z, x.iter().map(|v| v + 1.0).collect::<Vec<_>>());
}

#[test]
fn test_compile_errors() {
    let registry = GeneratorRegistry::with_defaults();

    let unknown = CompiledNetwork::compile(
        add_builder(),
        &registry,
        RuntimeConfig::default().with_generator("jit"),
    );
    assert!(matches!(
        unknown,
        Err(SnippetForgeError::Config(ConfigError::UnknownGenerator(_)))
    ));

    let desc = TensorDesc::f32(&SHAPE);
    let missing_port = NetworkBuilder::new("broken")
        .input("x", desc.clone())
        .output("z", desc.clone())
        .subgraph("add0", binary("add", Op::Add, &desc), &["x", "nope"], &["z"]);
    assert!(matches!(
        CompiledNetwork::compile(missing_port, &registry, RuntimeConfig::default()),
        Err(SnippetForgeError::NotFound(_))
    ));

    let duplicate = NetworkBuilder::new("dup")
        .input("x", desc.clone())
        .input("x", desc.clone())
        .optimized_out("noop", "Identity");
    assert!(matches!(
        CompiledNetwork::compile(duplicate, &registry, RuntimeConfig::default()),
        Err(SnippetForgeError::ParameterMismatch(_))
    ));

    let empty = NetworkBuilder::new("empty").input("x", desc);
    assert!(matches!(
        CompiledNetwork::compile(empty, &registry, RuntimeConfig::default()),
        Err(SnippetForgeError::NetworkNotLoaded(_))
    ));

    assert!(matches!(
        CompiledNetwork::compile(
            add_builder(),
            &registry,
            RuntimeConfig::default().with_num_threads(0)
        ),
        Err(SnippetForgeError::Config(ConfigError::OutOfRange { .. }))
    ));
}

#[test]
fn test_request_limit_and_lookup() {
    let network = add_network(RuntimeConfig::default().with_max_requests(2));
    let first = network.create_infer_request().unwrap();
    let second = network.create_infer_request().unwrap();
    assert_ne!(first.id(), second.id());
    assert!(matches!(
        network.create_infer_request(),
        Err(SnippetForgeError::OutOfBounds(_))
    ));

    let found = network.request(second.id()).unwrap();
    assert_eq!(found.id(), second.id());
    drop(found);

    let released = first.id();
    drop(first);
    assert_eq!(network.live_requests().unwrap(), 1);
    assert!(matches!(
        network.request(released),
        Err(SnippetForgeError::NotFound(_))
    ));
    assert!(network.create_infer_request().is_ok());
}

#[test]
fn test_metrics_count_requests() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    request.infer().unwrap();
    request.infer().unwrap();

    let metrics = network.metrics();
    assert_eq!(metrics.requests_started.get(), 2);
    assert_eq!(metrics.requests_completed.get(), 2);
    assert!(metrics.kernel_invocations.get() > 0);

    let export = metrics.export();
    assert!(export.contains("snippetforge_requests_completed_total 2"));
    assert!(export.contains("snippetforge_schedule_definition_seconds"));
}

/// Generator whose kernels always fail.
struct FailingGenerator;

impl KernelGenerator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    fn supports(&self, element_type: ElementType) -> bool {
        element_type == ElementType::F32
    }

    fn generate(&self, args: &CompileArgs) -> CodegenResult<Option<CompiledKernel>> {
        let name = format!("failing_{}", args.subgraph.name);
        Ok(Some(CompiledKernel::new(name, |_, _| {
            Err(KernelError::Failed("injected".to_string()))
        })))
    }
}

/// Generator that never produces a kernel.
struct NullGenerator;

impl KernelGenerator for NullGenerator {
    fn name(&self) -> &str {
        "null"
    }

    fn supports(&self, _: ElementType) -> bool {
        false
    }

    fn generate(&self, _: &CompileArgs) -> CodegenResult<Option<CompiledKernel>> {
        Ok(None)
    }
}

#[test]
fn test_kernel_failure_and_missing_kernel() {
    let mut registry = GeneratorRegistry::with_defaults();
    registry.register(Arc::new(FailingGenerator));
    registry.register(Arc::new(NullGenerator));

    let failing = CompiledNetwork::compile(
        add_builder(),
        &registry,
        RuntimeConfig::default().with_generator("failing"),
    )
    .unwrap();
    let request = failing.create_infer_request().unwrap();
    let err = request.infer().unwrap_err();
    assert_eq!(StatusCode::from_error(&err), StatusCode::GeneralError);
    assert_eq!(failing.metrics().requests_failed.get(), 1);

    let null = CompiledNetwork::compile(
        add_builder(),
        &registry,
        RuntimeConfig::default().with_generator("null"),
    )
    .unwrap();
    let request = null.create_infer_request().unwrap();
    let err = request.infer().unwrap_err();
    assert_eq!(StatusCode::from_error(&err), StatusCode::NotImplemented);
    let info = request.get_profiling_info().unwrap();
    assert_eq!(info[0].exec_type, "undef");
}
