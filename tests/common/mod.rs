//! Shared network fixtures for integration tests

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snippetforge::request::InferRequest;
use snippetforge::runtime::{CompiledNetwork, GeneratorRegistry, NetworkBuilder, RuntimeConfig};
use snippetforge::subgraph::{Op, Subgraph};
use snippetforge::TensorDesc;

pub const SHAPE: [usize; 2] = [2, 8];
pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn binary(name: &str, op: Op, desc: &TensorDesc) -> Subgraph {
    let mut builder = Subgraph::builder(name);
    let x = builder.parameter(desc.clone());
    let y = builder.parameter(desc.clone());
    let z = builder.binary(op, x, y);
    builder.result(z);
    builder.build().unwrap()
}

/// `z = x + y` over [`SHAPE`].
pub fn add_builder() -> NetworkBuilder {
    let desc = TensorDesc::f32(&SHAPE);
    NetworkBuilder::new("add")
        .input("x", desc.clone())
        .input("y", desc.clone())
        .output("z", desc.clone())
        .subgraph("add0", binary("add", Op::Add, &desc), &["x", "y"], &["z"])
}

pub fn add_network(config: RuntimeConfig) -> Arc<CompiledNetwork> {
    CompiledNetwork::compile(add_builder(), &GeneratorRegistry::with_defaults(), config).unwrap()
}

pub fn single_thread() -> RuntimeConfig {
    RuntimeConfig::default().with_num_threads(1)
}

pub fn iota(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32).collect()
}

/// Occupies the only worker of a single-threaded network until released.
///
/// The blocker request parks inside its completion callback, so anything
/// started afterwards stays queued behind it.
pub struct PoolBlocker {
    request: InferRequest,
    release: Sender<()>,
}

impl PoolBlocker {
    pub fn engage(network: &Arc<CompiledNetwork>) -> Self {
        let request = network.create_infer_request().unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx): (Sender<()>, Receiver<()>) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        request
            .set_callback(move |_, _| {
                entered_tx.lock().unwrap().send(()).ok();
                release_rx.lock().unwrap().recv_timeout(TIMEOUT).ok();
            })
            .unwrap();
        request.start_async().unwrap();
        entered_rx.recv_timeout(TIMEOUT).unwrap();
        PoolBlocker {
            request,
            release: release_tx,
        }
    }

    pub fn release(self) {
        self.release.send(()).ok();
        self.request.wait().unwrap();
    }
}
