//! Elementwise operations allowed inside a fused subgraph body.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // unary
    Neg,
    Abs,
    Relu,
    Exp,
    Sqrt,
    Sigmoid,
    // binary
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
    /// Constant broadcast to every element
    Scalar(f32),
}

impl Op {
    pub fn arity(&self) -> usize {
        match self {
            Op::Scalar(_) => 0,
            Op::Neg | Op::Abs | Op::Relu | Op::Exp | Op::Sqrt | Op::Sigmoid => 1,
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Max | Op::Min | Op::Pow => 2,
        }
    }

    /// Evaluate on already-loaded operands. `args.len()` must equal `arity()`.
    #[inline]
    pub fn eval(&self, args: &[f32]) -> f32 {
        match *self {
            Op::Scalar(v) => v,
            Op::Neg => -args[0],
            Op::Abs => args[0].abs(),
            Op::Relu => args[0].max(0.0),
            Op::Exp => args[0].exp(),
            Op::Sqrt => args[0].sqrt(),
            Op::Sigmoid => 1.0 / (1.0 + (-args[0]).exp()),
            Op::Add => args[0] + args[1],
            Op::Sub => args[0] - args[1],
            Op::Mul => args[0] * args[1],
            Op::Div => args[0] / args[1],
            Op::Max => args[0].max(args[1]),
            Op::Min => args[0].min(args[1]),
            Op::Pow => args[0].powf(args[1]),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Neg => "Negative",
            Op::Abs => "Abs",
            Op::Relu => "Relu",
            Op::Exp => "Exp",
            Op::Sqrt => "Sqrt",
            Op::Sigmoid => "Sigmoid",
            Op::Add => "Add",
            Op::Sub => "Subtract",
            Op::Mul => "Multiply",
            Op::Div => "Divide",
            Op::Max => "Maximum",
            Op::Min => "Minimum",
            Op::Pow => "Power",
            Op::Scalar(_) => "Scalar",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
