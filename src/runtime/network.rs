//! Compiled networks: ports, nodes and the worker pool requests run on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, info_span, trace};

use crate::error::{self, ForgeResult, SnippetForgeError};
use crate::layout::TensorDesc;
use crate::metrics::{Metrics, Phase, PhaseTimer};
use crate::profiling::{NodeTimer, ProfilingInfo, ProfilingStatus};
use crate::request::infer_request::RequestShared;
use crate::request::tensor::bind_operands;
use crate::request::variable::VariableSlot;
use crate::request::{HostTensor, InferRequest, RequestId, RequestTable, Tensor};
use crate::schedule::{KernelScheduler, Schedule};
use crate::subgraph::Subgraph;

use super::config::{ConfigError, RuntimeConfig};
use super::registry::GeneratorRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortKind {
    Input,
    Output,
    Intermediate,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortKind::Input => "input",
            PortKind::Output => "output",
            PortKind::Intermediate => "intermediate",
        };
        f.write_str(s)
    }
}

/// Named tensor slot of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    pub name: String,
    pub kind: PortKind,
    pub desc: TensorDesc,
}

#[derive(Debug)]
struct VariableDecl {
    name: String,
    initial: HostTensor,
}

enum NodeDecl {
    Subgraph {
        name: String,
        subgraph: Subgraph,
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
    ReadValue {
        name: String,
        variable: String,
        port: String,
    },
    Assign {
        name: String,
        port: String,
        variable: String,
    },
    OptimizedOut {
        name: String,
        node_type: String,
    },
}

/// Declares ports, variables and nodes in execution order.
///
/// ```ignore
/// let builder = NetworkBuilder::new("add")
///     .input("x", TensorDesc::f32(&[2, 8]))
///     .input("y", TensorDesc::f32(&[2, 8]))
///     .output("z", TensorDesc::f32(&[2, 8]))
///     .subgraph("add0", add, &["x", "y"], &["z"]);
/// ```
pub struct NetworkBuilder {
    name: String,
    ports: Vec<Port>,
    variables: Vec<VariableDecl>,
    nodes: Vec<NodeDecl>,
}

impl NetworkBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        NetworkBuilder {
            name: name.into(),
            ports: Vec::new(),
            variables: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn port(mut self, name: impl Into<String>, kind: PortKind, desc: TensorDesc) -> Self {
        self.ports.push(Port {
            name: name.into(),
            kind,
            desc,
        });
        self
    }

    pub fn input(self, name: impl Into<String>, desc: TensorDesc) -> Self {
        self.port(name, PortKind::Input, desc)
    }

    pub fn output(self, name: impl Into<String>, desc: TensorDesc) -> Self {
        self.port(name, PortKind::Output, desc)
    }

    pub fn intermediate(self, name: impl Into<String>, desc: TensorDesc) -> Self {
        self.port(name, PortKind::Intermediate, desc)
    }

    /// State variable copied into every request with `initial` as its value.
    pub fn variable(mut self, name: impl Into<String>, initial: HostTensor) -> Self {
        self.variables.push(VariableDecl {
            name: name.into(),
            initial,
        });
        self
    }

    pub fn subgraph(
        mut self,
        name: impl Into<String>,
        subgraph: Subgraph,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        self.nodes.push(NodeDecl::Subgraph {
            name: name.into(),
            subgraph,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Copy `variable` into `port`.
    pub fn read_value(
        mut self,
        name: impl Into<String>,
        variable: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        self.nodes.push(NodeDecl::ReadValue {
            name: name.into(),
            variable: variable.into(),
            port: port.into(),
        });
        self
    }

    /// Copy `port` into `variable`.
    pub fn assign(
        mut self,
        name: impl Into<String>,
        port: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        self.nodes.push(NodeDecl::Assign {
            name: name.into(),
            port: port.into(),
            variable: variable.into(),
        });
        self
    }

    /// Node removed by graph optimization; it only shows up in profiling.
    pub fn optimized_out(mut self, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.nodes.push(NodeDecl::OptimizedOut {
            name: name.into(),
            node_type: node_type.into(),
        });
        self
    }
}

enum CompiledNode {
    Subgraph {
        name: String,
        scheduler: KernelScheduler,
        inputs: Vec<usize>,
        outputs: Vec<usize>,
    },
    ReadValue {
        name: String,
        variable: usize,
        port: usize,
    },
    Assign {
        name: String,
        port: usize,
        variable: usize,
    },
    OptimizedOut {
        name: String,
        node_type: String,
    },
}

impl CompiledNode {
    fn name(&self) -> &str {
        match self {
            CompiledNode::Subgraph { name, .. }
            | CompiledNode::ReadValue { name, .. }
            | CompiledNode::Assign { name, .. }
            | CompiledNode::OptimizedOut { name, .. } => name,
        }
    }

    fn node_type(&self) -> &str {
        match self {
            CompiledNode::Subgraph { .. } => "Subgraph",
            CompiledNode::ReadValue { .. } => "ReadValue",
            CompiledNode::Assign { .. } => "Assign",
            CompiledNode::OptimizedOut { node_type, .. } => node_type,
        }
    }

    fn exec_type(&self) -> &str {
        match self {
            CompiledNode::Subgraph { scheduler, .. } => scheduler.kernel_name().unwrap_or("undef"),
            CompiledNode::ReadValue { .. } | CompiledNode::Assign { .. } => "copy",
            CompiledNode::OptimizedOut { .. } => "undef",
        }
    }

    fn profiling_entry(&self, exec_index: usize) -> ProfilingInfo {
        let status = match self {
            CompiledNode::OptimizedOut { .. } => ProfilingStatus::OptimizedOut,
            _ => ProfilingStatus::NotRun,
        };
        ProfilingInfo::new(
            exec_index,
            self.name(),
            self.exec_type(),
            self.node_type(),
            status,
        )
    }
}

/// A network whose schedules are all defined, ready to create requests.
pub struct CompiledNetwork {
    name: String,
    config: RuntimeConfig,
    ports: Vec<Port>,
    port_index: HashMap<String, usize>,
    variables: Vec<VariableDecl>,
    nodes: Vec<CompiledNode>,
    pool: rayon::ThreadPool,
    metrics: Arc<Metrics>,
    requests: RequestTable,
}

impl fmt::Debug for CompiledNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledNetwork")
            .field("name", &self.name)
            .field("ports", &self.ports)
            .field("nodes", &self.nodes.len())
            .field("num_threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl CompiledNetwork {
    /// Define every schedule and build the worker pool.
    pub fn compile(
        builder: NetworkBuilder,
        registry: &GeneratorRegistry,
        config: RuntimeConfig,
    ) -> ForgeResult<Arc<Self>> {
        config.validate()?;
        let generator = registry
            .get(&config.generator)
            .map_err(|_| ConfigError::UnknownGenerator(config.generator.clone()))?;

        let NetworkBuilder {
            name,
            ports,
            variables,
            nodes,
        } = builder;
        if nodes.is_empty() {
            return Err(SnippetForgeError::NetworkNotLoaded(format!(
                "network {} has no nodes",
                name
            )));
        }

        let mut port_index = HashMap::with_capacity(ports.len());
        for (index, port) in ports.iter().enumerate() {
            port.desc.byte_size()?;
            if port_index.insert(port.name.clone(), index).is_some() {
                return Err(SnippetForgeError::ParameterMismatch(format!(
                    "port {} declared twice",
                    port.name
                )));
            }
        }
        let mut variable_index = HashMap::with_capacity(variables.len());
        for (index, variable) in variables.iter().enumerate() {
            if variable_index.insert(variable.name.clone(), index).is_some() {
                return Err(SnippetForgeError::ParameterMismatch(format!(
                    "variable {} declared twice",
                    variable.name
                )));
            }
        }

        // Collapse must keep enough partitions for the pool that runs the kernels.
        let scheduler_config = config.scheduler.clone().or_concurrency(config.num_threads);
        let metrics = Arc::new(Metrics::new());
        let lookup_port = |port: &str| {
            port_index
                .get(port)
                .copied()
                .ok_or_else(|| SnippetForgeError::NotFound(format!("port {}", port)))
        };
        let lookup_variable = |variable: &str| {
            variable_index
                .get(variable)
                .copied()
                .ok_or_else(|| SnippetForgeError::NotFound(format!("variable {}", variable)))
        };
        let check_variable = |variable: usize, port: usize| {
            let var_desc = variables[variable].initial.desc();
            let port_desc = &ports[port].desc;
            if var_desc.is_compatible_with(port_desc) {
                Ok(())
            } else {
                Err(SnippetForgeError::ParameterMismatch(format!(
                    "variable {} is {}{:?}, port {} is {}{:?}",
                    variables[variable].name,
                    var_desc.element_type,
                    var_desc.shape,
                    ports[port].name,
                    port_desc.element_type,
                    port_desc.shape
                )))
            }
        };

        let mut compiled = Vec::with_capacity(nodes.len());
        for node in nodes {
            let node = match node {
                NodeDecl::Subgraph {
                    name,
                    subgraph,
                    inputs,
                    outputs,
                } => {
                    let inputs = inputs
                        .iter()
                        .map(|p| lookup_port(p.as_str()))
                        .collect::<ForgeResult<Vec<_>>>()?;
                    let outputs = outputs
                        .iter()
                        .map(|p| lookup_port(p.as_str()))
                        .collect::<ForgeResult<Vec<_>>>()?;
                    if let Some(&index) = outputs.iter().find(|&&i| ports[i].kind == PortKind::Input) {
                        return Err(SnippetForgeError::ParameterMismatch(format!(
                            "node {} writes to network input {}",
                            name, ports[index].name
                        )));
                    }

                    let input_descs: Vec<TensorDesc> =
                        inputs.iter().map(|&i| ports[i].desc.clone()).collect();
                    let output_descs: Vec<TensorDesc> =
                        outputs.iter().map(|&i| ports[i].desc.clone()).collect();
                    let timer = PhaseTimer::new(Some(Arc::clone(&metrics)), Phase::Schedule);
                    let scheduler = KernelScheduler::define_schedule(
                        &subgraph,
                        &input_descs,
                        &output_descs,
                        generator.as_ref(),
                        &scheduler_config,
                    )?;
                    timer.finish();

                    CompiledNode::Subgraph {
                        name,
                        scheduler,
                        inputs,
                        outputs,
                    }
                }
                NodeDecl::ReadValue {
                    name,
                    variable,
                    port,
                } => {
                    let variable = lookup_variable(variable.as_str())?;
                    let port = lookup_port(port.as_str())?;
                    check_variable(variable, port)?;
                    CompiledNode::ReadValue {
                        name,
                        variable,
                        port,
                    }
                }
                NodeDecl::Assign {
                    name,
                    port,
                    variable,
                } => {
                    let variable = lookup_variable(variable.as_str())?;
                    let port = lookup_port(port.as_str())?;
                    check_variable(variable, port)?;
                    CompiledNode::Assign {
                        name,
                        port,
                        variable,
                    }
                }
                NodeDecl::OptimizedOut { name, node_type } => {
                    CompiledNode::OptimizedOut { name, node_type }
                }
            };
            compiled.push(node);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("snippetforge-worker-{}", i))
            .build()
            .map_err(|e| error::context(e, "building worker pool"))?;

        info!(
            network = %name,
            ports = ports.len(),
            nodes = compiled.len(),
            threads = config.num_threads,
            generator = %config.generator,
            "compiled network"
        );

        Ok(Arc::new(CompiledNetwork {
            name,
            config,
            ports,
            port_index,
            variables,
            nodes: compiled,
            pool,
            metrics,
            requests: RequestTable::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port_names(&self, kind: PortKind) -> Vec<String> {
        self.ports
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Schedule of the subgraph node `node`.
    pub fn schedule(&self, node: &str) -> Option<&Schedule> {
        self.nodes.iter().find_map(|n| match n {
            CompiledNode::Subgraph {
                name, scheduler, ..
            } if name == node => Some(scheduler.schedule()),
            _ => None,
        })
    }

    /// Number of live requests.
    pub fn live_requests(&self) -> ForgeResult<usize> {
        self.requests.len()
    }

    /// Look up a live request by id.
    pub fn request(&self, id: RequestId) -> ForgeResult<InferRequest> {
        self.requests
            .resolve(id)?
            .map(InferRequest::from_shared)
            .ok_or_else(|| SnippetForgeError::NotFound(format!("request {}", id)))
    }

    /// Allocate port tensors and variable copies for a new request.
    pub fn create_infer_request(self: &Arc<Self>) -> ForgeResult<InferRequest> {
        let live = self.requests.len()?;
        if live >= self.config.max_requests {
            return Err(SnippetForgeError::OutOfBounds(format!(
                "network {} already has {} live requests",
                self.name, live
            )));
        }

        let tensors = self
            .ports
            .iter()
            .map(|p| HostTensor::zeros(p.desc.clone()).map(Tensor::Host))
            .collect::<ForgeResult<Vec<_>>>()?;
        let variables = self
            .variables
            .iter()
            .map(|v| VariableSlot::new(&v.name, &v.initial).map(Arc::new))
            .collect::<ForgeResult<Vec<_>>>()?;
        let profiling = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| node.profiling_entry(i))
            .collect();

        let id = self.requests.allocate_id();
        let shared = Arc::new(RequestShared::new(
            id,
            Arc::downgrade(self),
            tensors,
            variables,
            profiling,
        ));
        self.requests.insert(id, Arc::downgrade(&shared))?;
        debug!(network = %self.name, request = %id, "created infer request");
        Ok(InferRequest::from_shared(shared))
    }

    pub(crate) fn requests(&self) -> &RequestTable {
        &self.requests
    }

    pub(crate) fn port_index(&self, name: &str) -> ForgeResult<usize> {
        self.port_index
            .get(name)
            .copied()
            .ok_or_else(|| SnippetForgeError::NotFound(format!("port {}", name)))
    }

    pub(crate) fn port(&self, index: usize) -> ForgeResult<&Port> {
        self.ports
            .get(index)
            .ok_or_else(|| SnippetForgeError::InternalError(format!("port {} missing", index)))
    }

    /// A tensor bound to a port must match its shape, precision, layout and padding.
    pub(crate) fn check_binding(&self, index: usize, desc: &TensorDesc) -> ForgeResult<()> {
        let port = self.port(index)?;
        if desc.is_compatible_with(&port.desc)
            && desc.layout == port.desc.layout
            && desc.offset_padding == port.desc.offset_padding
        {
            return Ok(());
        }
        Err(SnippetForgeError::ParameterMismatch(format!(
            "port {} expects {}{:?} ({}, padding {}), got {}{:?} ({}, padding {})",
            port.name,
            port.desc.element_type,
            port.desc.shape,
            port.desc.layout,
            port.desc.offset_padding,
            desc.element_type,
            desc.shape,
            desc.layout,
            desc.offset_padding
        )))
    }

    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }

    /// Run every node of `request` in order on the calling worker.
    pub(crate) fn run_request(&self, request: &RequestShared) -> ForgeResult<()> {
        let span = info_span!("infer", network = %self.name, request = %request.id());
        let _enter = span.enter();

        for (index, node) in self.nodes.iter().enumerate() {
            if request.is_cancel_requested() {
                debug!(node = node.name(), "cancellation observed");
                return Err(SnippetForgeError::InferCancelled);
            }
            if let CompiledNode::OptimizedOut { .. } = node {
                continue;
            }

            let mut timer = NodeTimer::for_node(node.name());
            timer.start();
            let cpu_time = self.run_node(request, node)?;
            timer.stop();
            let real_time = timer.elapsed_or_zero();

            trace!(
                node = node.name(),
                node_type = node.node_type(),
                real_us = real_time.as_micros() as u64,
                cpu_us = cpu_time.map(|d| d.as_micros() as u64).unwrap_or(0),
                "node executed"
            );
            if self.config.enable_profiling {
                request.record_profile(index, real_time, cpu_time.unwrap_or(real_time))?;
            }
        }
        Ok(())
    }

    /// Kernel time for subgraph nodes; `None` for copies.
    fn run_node(&self, request: &RequestShared, node: &CompiledNode) -> ForgeResult<Option<Duration>> {
        let tensors = request.tensors()?;
        match node {
            CompiledNode::Subgraph {
                name,
                scheduler,
                inputs,
                outputs,
            } => {
                let inputs = inputs
                    .iter()
                    .map(|&i| self.host_operand(&tensors, i, name))
                    .collect::<ForgeResult<Vec<_>>>()?;
                let outputs = outputs
                    .iter()
                    .map(|&i| self.host_operand(&tensors, i, name))
                    .collect::<ForgeResult<Vec<_>>>()?;

                let bound = bind_operands(&inputs, &outputs)?;
                // SAFETY: every buffer stays locked for the duration of the
                // call, and `bind_operands` checked under those locks that it
                // holds `byte_size()` of the descriptor the schedule was
                // defined with. Buffer lengths never change after creation.
                let stats = unsafe { scheduler.execute(&bound.pointers)? };
                drop(bound);

                self.metrics.record_kernel_invocations(stats.invocations);
                Ok(Some(stats.kernel_time))
            }
            CompiledNode::ReadValue {
                name,
                variable,
                port,
            } => {
                let dst = self.host_operand(&tensors, *port, name)?;
                dst.copy_from(request.variable(*variable)?.value())?;
                Ok(None)
            }
            CompiledNode::Assign {
                name,
                port,
                variable,
            } => {
                let src = self.host_operand(&tensors, *port, name)?;
                request.variable(*variable)?.value().copy_from(src)?;
                Ok(None)
            }
            CompiledNode::OptimizedOut { .. } => Ok(None),
        }
    }

    fn host_operand<'t>(
        &self,
        tensors: &'t [Tensor],
        index: usize,
        node: &str,
    ) -> ForgeResult<&'t HostTensor> {
        let port = self.port(index)?;
        let tensor = tensors
            .get(index)
            .ok_or_else(|| SnippetForgeError::InternalError(format!("tensor {} missing", index)))?;
        match tensor {
            Tensor::Host(host) => {
                let required = port.desc.byte_size()?;
                let available = host.byte_len()?;
                if available < required {
                    return Err(SnippetForgeError::NotAllocated(format!(
                        "port {} holds {} bytes, node {} needs {}",
                        port.name, available, node, required
                    )));
                }
                Ok(host)
            }
            Tensor::Remote(remote) => Err(SnippetForgeError::ParameterMismatch(format!(
                "node {} cannot read remote tensor on {} bound to port {}",
                node,
                remote.device(),
                port.name
            ))),
        }
    }
}
