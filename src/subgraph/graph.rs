//! Body of a fused subgraph.
//!
//! Values are numbered in definition order: parameters first, then one value
//! per body node. Nodes may only reference values defined before them.

use serde::Serialize;

use super::{Op, SubgraphError, SubgraphResult};
use crate::layout::{ElementType, TensorDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ValueId(pub usize);

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub op: Op,
    pub inputs: Vec<ValueId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub name: String,
    pub parameters: Vec<TensorDesc>,
    pub body: Vec<Node>,
    pub results: Vec<ValueId>,
}

impl Subgraph {
    pub fn builder(name: impl Into<String>) -> SubgraphBuilder {
        SubgraphBuilder::new(name)
    }

    pub fn num_values(&self) -> usize {
        self.parameters.len() + self.body.len()
    }

    pub fn element_type(&self) -> Option<ElementType> {
        self.parameters.first().map(|p| p.element_type)
    }

    pub fn validate(&self) -> SubgraphResult<()> {
        if self.parameters.is_empty() {
            return Err(SubgraphError::NoParameters(self.name.clone()));
        }
        if self.results.is_empty() {
            return Err(SubgraphError::NoResults(self.name.clone()));
        }

        for (index, node) in self.body.iter().enumerate() {
            if node.inputs.len() != node.op.arity() {
                return Err(SubgraphError::Arity {
                    node: index,
                    op: node.op.name(),
                    expected: node.op.arity(),
                    actual: node.inputs.len(),
                });
            }
            let defined = self.parameters.len() + index;
            if let Some(bad) = node.inputs.iter().find(|v| v.0 >= defined) {
                return Err(SubgraphError::UndefinedValue {
                    node: index,
                    value: bad.0,
                });
            }
        }

        if let Some(bad) = self.results.iter().find(|v| v.0 >= self.num_values()) {
            return Err(SubgraphError::UndefinedResult(bad.0));
        }
        Ok(())
    }
}

/// Incremental construction of a [`Subgraph`].
#[derive(Debug, Clone)]
pub struct SubgraphBuilder {
    name: String,
    parameters: Vec<TensorDesc>,
    body: Vec<Node>,
    results: Vec<ValueId>,
}

impl SubgraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        SubgraphBuilder {
            name: name.into(),
            parameters: Vec::new(),
            body: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Parameters must all be declared before the first node.
    pub fn parameter(&mut self, desc: TensorDesc) -> ValueId {
        self.parameters.push(desc);
        ValueId(self.parameters.len() - 1)
    }

    pub fn node(&mut self, op: Op, inputs: &[ValueId]) -> ValueId {
        self.body.push(Node {
            op,
            inputs: inputs.to_vec(),
        });
        ValueId(self.parameters.len() + self.body.len() - 1)
    }

    pub fn unary(&mut self, op: Op, a: ValueId) -> ValueId {
        self.node(op, &[a])
    }

    pub fn binary(&mut self, op: Op, a: ValueId, b: ValueId) -> ValueId {
        self.node(op, &[a, b])
    }

    pub fn scalar(&mut self, value: f32) -> ValueId {
        self.node(Op::Scalar(value), &[])
    }

    pub fn result(&mut self, value: ValueId) -> &mut Self {
        self.results.push(value);
        self
    }

    pub fn build(self) -> SubgraphResult<Subgraph> {
        let subgraph = Subgraph {
            name: self.name,
            parameters: self.parameters,
            body: self.body,
            results: self.results,
        };
        subgraph.validate()?;
        Ok(subgraph)
    }
}
