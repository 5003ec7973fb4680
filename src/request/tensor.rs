//! Tensors bound to infer request ports.
//!
//! Host tensors share their buffer between clones, so a caller keeps a handle
//! and reads results after the request completes. Buffers are guarded by a
//! `RwLock`; kernel dispatch holds the locks for the duration of one node.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ForgeResult, SnippetForgeError};
use crate::layout::{ElementType, TensorDesc};
use crate::schedule::BufferPointers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Host,
    Remote,
}

/// Byte storage of a host tensor. The length is fixed at construction.
#[derive(Debug, Default)]
pub struct HostBuffer {
    data: RwLock<Vec<u8>>,
}

/// Shared view of a locked [`HostBuffer`].
pub struct BufferReadGuard<'a>(RwLockReadGuard<'a, Vec<u8>>);

impl Deref for BufferReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Exclusive view of a locked [`HostBuffer`]; bytes can change, the length cannot.
pub struct BufferWriteGuard<'a>(RwLockWriteGuard<'a, Vec<u8>>);

impl Deref for BufferWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for BufferWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl HostBuffer {
    pub fn new(len: usize) -> Self {
        Self::from_bytes(vec![0; len])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        HostBuffer {
            data: RwLock::new(bytes),
        }
    }

    pub fn len(&self) -> ForgeResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> ForgeResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read(&self) -> ForgeResult<BufferReadGuard<'_>> {
        Ok(BufferReadGuard(self.data.read()?))
    }

    pub fn write(&self) -> ForgeResult<BufferWriteGuard<'_>> {
        Ok(BufferWriteGuard(self.data.write()?))
    }

    fn address(&self) -> usize {
        self as *const HostBuffer as usize
    }
}

#[derive(Debug, Clone)]
pub struct HostTensor {
    desc: TensorDesc,
    buffer: Arc<HostBuffer>,
}

impl HostTensor {
    /// Zero-filled tensor large enough for `desc`.
    pub fn zeros(desc: TensorDesc) -> ForgeResult<Self> {
        let len = desc.byte_size()?;
        Ok(HostTensor {
            desc,
            buffer: Arc::new(HostBuffer::new(len)),
        })
    }

    /// Descriptor without storage; reading it through a request fails.
    pub fn unallocated(desc: TensorDesc) -> Self {
        HostTensor {
            desc,
            buffer: Arc::new(HostBuffer::default()),
        }
    }

    pub fn from_bytes(desc: TensorDesc, bytes: Vec<u8>) -> ForgeResult<Self> {
        let expected = desc.byte_size()?;
        if bytes.len() != expected {
            return Err(SnippetForgeError::ParameterMismatch(format!(
                "tensor {:?} needs {} bytes, got {}",
                desc.shape,
                expected,
                bytes.len()
            )));
        }
        Ok(HostTensor {
            desc,
            buffer: Arc::new(HostBuffer::from_bytes(bytes)),
        })
    }

    /// Planar f32 tensor holding `data` in row-major order.
    pub fn from_f32(shape: &[usize], data: &[f32]) -> ForgeResult<Self> {
        let tensor = Self::zeros(TensorDesc::f32(shape))?;
        tensor.copy_from_f32(data)?;
        Ok(tensor)
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn buffer(&self) -> &Arc<HostBuffer> {
        &self.buffer
    }

    pub fn byte_len(&self) -> ForgeResult<usize> {
        self.buffer.len()
    }

    /// Buffer present, or nothing to store.
    pub fn is_allocated(&self) -> ForgeResult<bool> {
        Ok(!self.buffer.is_empty()? || self.desc.element_count() == 0)
    }

    pub fn shares_buffer(&self, other: &HostTensor) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Physical elements after the offset padding.
    pub fn to_f32_vec(&self) -> ForgeResult<Vec<f32>> {
        self.expect_f32()?;
        let start = self.desc.offset_padding * self.desc.element_size();
        let bytes = self.buffer.read()?;
        let payload = bytes.get(start..).unwrap_or(&[]);
        Ok(payload
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Overwrite the physical elements after the offset padding.
    pub fn copy_from_f32(&self, data: &[f32]) -> ForgeResult<()> {
        self.expect_f32()?;
        let start = self.desc.offset_padding * self.desc.element_size();
        let mut bytes = self.buffer.write()?;
        let capacity = bytes.len().saturating_sub(start) / 4;
        if data.len() != capacity {
            return Err(SnippetForgeError::ParameterMismatch(format!(
                "tensor {:?} holds {} f32 values, got {}",
                self.desc.shape,
                capacity,
                data.len()
            )));
        }
        for (dst, value) in bytes[start..].chunks_exact_mut(4).zip(data) {
            dst.copy_from_slice(&value.to_ne_bytes());
        }
        Ok(())
    }

    /// Copy bytes from `src`; both buffers must have the same length.
    pub fn copy_from(&self, src: &HostTensor) -> ForgeResult<()> {
        if self.shares_buffer(src) {
            return Ok(());
        }
        // Lock in address order so two opposite copies cannot deadlock.
        let (mut dst_bytes, src_bytes) = if self.buffer.address() < src.buffer.address() {
            let dst = self.buffer.write()?;
            let src = src.buffer.read()?;
            (dst, src)
        } else {
            let src = src.buffer.read()?;
            let dst = self.buffer.write()?;
            (dst, src)
        };
        if dst_bytes.len() != src_bytes.len() {
            return Err(SnippetForgeError::ParameterMismatch(format!(
                "cannot copy {} bytes into a {} byte tensor",
                src_bytes.len(),
                dst_bytes.len()
            )));
        }
        dst_bytes.copy_from_slice(&src_bytes);
        Ok(())
    }

    /// Independent tensor with the same descriptor and contents.
    pub fn deep_copy(&self) -> ForgeResult<Self> {
        let bytes = self.buffer.read()?.to_vec();
        Ok(HostTensor {
            desc: self.desc.clone(),
            buffer: Arc::new(HostBuffer::from_bytes(bytes)),
        })
    }

    fn expect_f32(&self) -> ForgeResult<()> {
        if self.desc.element_type != ElementType::F32 {
            return Err(SnippetForgeError::ParameterMismatch(format!(
                "tensor has element type {}, not f32",
                self.desc.element_type
            )));
        }
        Ok(())
    }
}

/// Tensor living in device memory behind an opaque context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTensor {
    desc: TensorDesc,
    device: String,
    context_id: u64,
}

impl RemoteTensor {
    pub fn new(desc: TensorDesc, device: impl Into<String>, context_id: u64) -> Self {
        RemoteTensor {
            desc,
            device: device.into(),
            context_id,
        }
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }
}

#[derive(Debug, Clone)]
pub enum Tensor {
    Host(HostTensor),
    Remote(RemoteTensor),
}

impl Tensor {
    pub fn kind(&self) -> TensorKind {
        match self {
            Tensor::Host(_) => TensorKind::Host,
            Tensor::Remote(_) => TensorKind::Remote,
        }
    }

    pub fn desc(&self) -> &TensorDesc {
        match self {
            Tensor::Host(t) => t.desc(),
            Tensor::Remote(t) => t.desc(),
        }
    }

    pub fn as_host(&self) -> Option<&HostTensor> {
        match self {
            Tensor::Host(t) => Some(t),
            Tensor::Remote(_) => None,
        }
    }

    pub fn to_f32_vec(&self) -> ForgeResult<Vec<f32>> {
        match self {
            Tensor::Host(t) => t.to_f32_vec(),
            Tensor::Remote(t) => Err(SnippetForgeError::NotImplemented(format!(
                "reading remote tensor on {}",
                t.device()
            ))),
        }
    }
}

impl From<HostTensor> for Tensor {
    fn from(t: HostTensor) -> Self {
        Tensor::Host(t)
    }
}

impl From<RemoteTensor> for Tensor {
    fn from(t: RemoteTensor) -> Self {
        Tensor::Remote(t)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = self.desc();
        match self {
            Tensor::Host(_) => write!(f, "host {}{:?}", desc.element_type, desc.shape),
            Tensor::Remote(t) => write!(
                f,
                "remote({}) {}{:?}",
                t.device(),
                desc.element_type,
                desc.shape
            ),
        }
    }
}

/// Buffers of one node locked for kernel dispatch.
pub(crate) struct BoundOperands<'a> {
    pub(crate) pointers: BufferPointers,
    _read: Vec<BufferReadGuard<'a>>,
    _write: Vec<BufferWriteGuard<'a>>,
}

struct Binding<'a> {
    buffer: &'a HostBuffer,
    writable: bool,
    required: usize,
}

/// Lock every distinct buffer once, in address order, writing outputs.
///
/// A buffer used as both input and output is write-locked and both pointers
/// alias it. Each locked buffer must hold the byte size of every descriptor
/// bound to it, otherwise `NotAllocated`.
pub(crate) fn bind_operands<'a>(
    inputs: &[&'a HostTensor],
    outputs: &[&'a HostTensor],
) -> ForgeResult<BoundOperands<'a>> {
    let mut distinct: BTreeMap<usize, Binding<'a>> = BTreeMap::new();
    for (t, writable) in inputs
        .iter()
        .map(|t| (*t, false))
        .chain(outputs.iter().map(|t| (*t, true)))
    {
        let required = t.desc.byte_size()?;
        let binding = distinct.entry(t.buffer.address()).or_insert(Binding {
            buffer: t.buffer.as_ref(),
            writable,
            required,
        });
        binding.writable |= writable;
        binding.required = binding.required.max(required);
    }

    let mut bases: BTreeMap<usize, *mut u8> = BTreeMap::new();
    let mut read = Vec::new();
    let mut write = Vec::new();
    for (address, binding) in distinct {
        let available = if binding.writable {
            let mut guard = binding.buffer.write()?;
            let available = guard.len();
            bases.insert(address, guard.as_mut_ptr());
            write.push(guard);
            available
        } else {
            let guard = binding.buffer.read()?;
            let available = guard.len();
            bases.insert(address, guard.as_ptr() as *mut u8);
            read.push(guard);
            available
        };
        if available < binding.required {
            return Err(SnippetForgeError::NotAllocated(format!(
                "buffer holds {} bytes, operand needs {}",
                available, binding.required
            )));
        }
    }

    let base = |t: &HostTensor| {
        bases
            .get(&t.buffer.address())
            .copied()
            .ok_or_else(|| SnippetForgeError::InternalError("operand buffer was not locked".into()))
    };
    let pointers = BufferPointers::new(
        inputs
            .iter()
            .map(|t| base(*t).map(|p| p as *const u8))
            .collect::<ForgeResult<_>>()?,
        outputs.iter().map(|t| base(*t)).collect::<ForgeResult<_>>()?,
    );

    Ok(BoundOperands {
        pointers,
        _read: read,
        _write: write,
    })
}
