//! Per-request state variables read by `ReadValue` and written by `Assign`.

use std::sync::Arc;

use crate::error::{ForgeResult, SnippetForgeError};

use super::tensor::{HostTensor, Tensor};

/// Storage of one variable inside a request.
#[derive(Debug)]
pub(crate) struct VariableSlot {
    name: String,
    initial: HostTensor,
    value: HostTensor,
}

impl VariableSlot {
    pub(crate) fn new(name: impl Into<String>, initial: &HostTensor) -> ForgeResult<Self> {
        Ok(VariableSlot {
            name: name.into(),
            initial: initial.deep_copy()?,
            value: initial.deep_copy()?,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn value(&self) -> &HostTensor {
        &self.value
    }

    pub(crate) fn reset(&self) -> ForgeResult<()> {
        self.value.copy_from(&self.initial)
    }
}

/// Handle to a request variable returned by `query_state`.
#[derive(Debug, Clone)]
pub struct VariableState {
    slot: Arc<VariableSlot>,
}

impl VariableState {
    pub(crate) fn new(slot: Arc<VariableSlot>) -> Self {
        VariableState { slot }
    }

    pub fn name(&self) -> &str {
        self.slot.name()
    }

    /// Copy of the current value.
    pub fn state(&self) -> ForgeResult<Tensor> {
        Ok(Tensor::Host(self.slot.value().deep_copy()?))
    }

    /// Overwrite the value; shape and precision must match.
    pub fn set_state(&self, tensor: &Tensor) -> ForgeResult<()> {
        let current = self.slot.value();
        let host = tensor.as_host().ok_or_else(|| {
            SnippetForgeError::ParameterMismatch(format!(
                "variable {} only accepts host tensors",
                self.name()
            ))
        })?;
        if !host.desc().is_compatible_with(current.desc()) {
            return Err(SnippetForgeError::ParameterMismatch(format!(
                "variable {} is {}{:?}, got {}{:?}",
                self.name(),
                current.desc().element_type,
                current.desc().shape,
                host.desc().element_type,
                host.desc().shape
            )));
        }
        current.copy_from(host)
    }

    /// Restore the initial value.
    pub fn reset(&self) -> ForgeResult<()> {
        self.slot.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Arc<VariableSlot> {
        let initial = HostTensor::from_f32(&[2], &[1.0, 1.0]).unwrap();
        Arc::new(VariableSlot::new("acc", &initial).unwrap())
    }

    #[test]
    fn test_set_and_reset() {
        let state = VariableState::new(slot());
        let update = HostTensor::from_f32(&[2], &[3.0, 4.0]).unwrap();
        state.set_state(&update.into()).unwrap();
        assert_eq!(state.state().unwrap().to_f32_vec().unwrap(), vec![3.0, 4.0]);

        state.reset().unwrap();
        assert_eq!(state.state().unwrap().to_f32_vec().unwrap(), vec![1.0, 1.0]);
        assert_eq!(state.name(), "acc");
    }

    #[test]
    fn test_state_is_a_copy() {
        let state = VariableState::new(slot());
        let snapshot = state.state().unwrap();
        snapshot.as_host().unwrap().copy_from_f32(&[9.0, 9.0]).unwrap();
        assert_eq!(state.state().unwrap().to_f32_vec().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_set_state_rejects_other_shape() {
        let state = VariableState::new(slot());
        let wrong = HostTensor::from_f32(&[3], &[0.0; 3]).unwrap();
        assert!(matches!(
            state.set_state(&wrong.into()),
            Err(SnippetForgeError::ParameterMismatch(_))
        ));
    }
}
