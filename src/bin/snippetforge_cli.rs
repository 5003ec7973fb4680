use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use snippetforge::logging::init_logging_from_env;
use snippetforge::schedule::KernelScheduler;
use snippetforge::{
    CompiledNetwork, GeneratorRegistry, HostTensor, NetworkBuilder, Op, RuntimeConfig,
    SchedulerConfig, Subgraph, Tensor, TensorDesc,
};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "snippetforge-cli", version)]
#[command(about = "Inspect schedules and run elementwise subgraphs", long_about = None)]
struct Cli {
    /// Worker threads (defaults to SNIPFORGE_NUM_THREADS or available parallelism)
    #[arg(long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the schedule of a binary subgraph as JSON
    Schedule {
        /// First input shape, e.g. 2x4x3x5
        #[arg(long)]
        lhs: String,
        /// Second input shape
        #[arg(long)]
        rhs: String,
        #[arg(long, value_enum, default_value_t = BinaryOp::Add)]
        op: BinaryOp,
        /// Override the minimum concurrency used by collapsing
        #[arg(long)]
        min_concurrency: Option<usize>,
    },
    /// Execute a binary elementwise network and print profiling info
    Run {
        /// Shape of both inputs and the output, e.g. 8x64x64
        #[arg(long, default_value = "8x64x64")]
        shape: String,
        #[arg(long, value_enum, default_value_t = BinaryOp::Add)]
        op: BinaryOp,
        /// Number of infer runs
        #[arg(long, default_value_t = 1)]
        iterations: usize,
    },
    /// Run once and print the Prometheus metrics export
    Metrics {
        #[arg(long, default_value = "8x64x64")]
        shape: String,
        #[arg(long, value_enum, default_value_t = BinaryOp::Add)]
        op: BinaryOp,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BinaryOp {
    Add,
    Mul,
}

impl BinaryOp {
    fn op(self) -> Op {
        match self {
            BinaryOp::Add => Op::Add,
            BinaryOp::Mul => Op::Mul,
        }
    }

    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Mul => a * b,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_from_env().context("initializing logging")?;
    let cli = Cli::parse();

    let mut config = RuntimeConfig::from_env()?;
    if let Some(threads) = cli.threads {
        config = config.with_num_threads(threads);
    }

    match cli.command {
        Commands::Schedule {
            lhs,
            rhs,
            op,
            min_concurrency,
        } => {
            let mut scheduler_config = config.scheduler.clone();
            if let Some(concurrency) = min_concurrency {
                scheduler_config = scheduler_config.with_min_concurrency(concurrency);
            }
            print_schedule(&lhs, &rhs, op, &scheduler_config)?;
        }
        Commands::Run {
            shape,
            op,
            iterations,
        } => {
            let network = build_network(&shape, op, config.with_profiling(true))?;
            run_network(&network, &shape, op, iterations).await?;
        }
        Commands::Metrics { shape, op } => {
            let network = build_network(&shape, op, config)?;
            run_network(&network, &shape, op, 1).await?;
            println!("{}", network.metrics().export());
        }
    }
    Ok(())
}

fn parse_shape(text: &str) -> anyhow::Result<Vec<usize>> {
    text.split(['x', ','])
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid dimension '{}' in shape '{}'", dim, text))
        })
        .collect()
}

fn binary_subgraph(op: BinaryOp, lhs: TensorDesc, rhs: TensorDesc) -> anyhow::Result<Subgraph> {
    let mut builder = Subgraph::builder(format!("{:?}", op).to_lowercase());
    let a = builder.parameter(lhs);
    let b = builder.parameter(rhs);
    let out = builder.binary(op.op(), a, b);
    builder.result(out);
    Ok(builder.build()?)
}

/// Broadcast of the two shapes, right-aligned.
fn broadcast(lhs: &[usize], rhs: &[usize]) -> anyhow::Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let lhs = snippetforge::layout::prepend_with_ones(lhs, rank);
    let rhs = snippetforge::layout::prepend_with_ones(rhs, rank);
    lhs.iter()
        .zip(&rhs)
        .map(|(&a, &b)| match (a, b) {
            (a, b) if a == b => Ok(a),
            (1, b) => Ok(b),
            (a, 1) => Ok(a),
            (a, b) => anyhow::bail!("shapes do not broadcast: {} vs {}", a, b),
        })
        .collect()
}

fn print_schedule(
    lhs: &str,
    rhs: &str,
    op: BinaryOp,
    config: &SchedulerConfig,
) -> anyhow::Result<()> {
    let lhs = TensorDesc::f32(&parse_shape(lhs)?);
    let rhs = TensorDesc::f32(&parse_shape(rhs)?);
    let out = TensorDesc::f32(&broadcast(&lhs.shape, &rhs.shape)?);

    let subgraph = binary_subgraph(op, lhs.clone(), rhs.clone())?;
    let registry = GeneratorRegistry::with_defaults();
    let generator = registry.get(snippetforge::codegen::reference::REFERENCE_GENERATOR)?;
    let scheduler =
        KernelScheduler::define_schedule(&subgraph, &[lhs, rhs], &[out], generator.as_ref(), config)?;

    println!("{}", serde_json::to_string_pretty(scheduler.schedule())?);
    Ok(())
}

fn build_network(
    shape: &str,
    op: BinaryOp,
    config: RuntimeConfig,
) -> anyhow::Result<Arc<CompiledNetwork>> {
    let desc = TensorDesc::f32(&parse_shape(shape)?);
    let subgraph = binary_subgraph(op, desc.clone(), desc.clone())?;
    let builder = NetworkBuilder::new("cli")
        .input("a", desc.clone())
        .input("b", desc.clone())
        .output("out", desc)
        .subgraph("eltwise", subgraph, &["a", "b"], &["out"]);
    Ok(CompiledNetwork::compile(
        builder,
        &GeneratorRegistry::with_defaults(),
        config,
    )?)
}

async fn run_network(
    network: &Arc<CompiledNetwork>,
    shape: &str,
    op: BinaryOp,
    iterations: usize,
) -> anyhow::Result<()> {
    let dims = parse_shape(shape)?;
    let count: usize = dims.iter().product();
    let a: Vec<f32> = (0..count).map(|i| (i % 17) as f32).collect();
    let b: Vec<f32> = (0..count).map(|i| (i % 5) as f32 + 1.0).collect();

    let request = network.create_infer_request()?;
    request.set_input([
        ("a", Tensor::from(HostTensor::from_f32(&dims, &a)?)),
        ("b", Tensor::from(HostTensor::from_f32(&dims, &b)?)),
    ])?;

    for _ in 0..iterations.max(1) {
        request.start_async()?;
        request.wait_async().await?;
    }

    let out = request.get_tensor("out")?.to_f32_vec()?;
    let mismatches = out
        .iter()
        .enumerate()
        .filter(|(i, v)| (**v - op.apply(a[*i], b[*i])).abs() > 1e-5)
        .count();
    if mismatches > 0 {
        anyhow::bail!("{} of {} output elements are wrong", mismatches, count);
    }
    println!("request {}: {} elements verified", request.id(), count);

    for info in request.get_profiling_info()? {
        println!("{}", info);
    }
    Ok(())
}
