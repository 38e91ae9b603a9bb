//! N-dimensional typed buffers carried between graph nodes.
//!
//! A [`Tensor`] owns (or views) a byte range inside a [`MemoryPool`] and
//! interprets it as a dense, row-major array of one [`DataType`]. Shapes are
//! fixed at construction; reshape only changes the stride metadata, never
//! the backing allocation.

use alloc::vec::Vec;

use crate::error::{LibetudeError, Result};
use crate::pool::{MemoryPool, PoolHandle};

/// Maximum number of dimensions a [`Tensor`] may have.
pub const MAX_DIMS: usize = 8;

/// Element types a [`Tensor`] may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit IEEE float.
    F32,
    /// IEEE half-precision float, stored as its 16-bit bit pattern.
    F16,
    /// Brain float16, stored as its 16-bit bit pattern.
    BF16,
    /// Signed 8-bit integer.
    I8,
    /// Signed 4-bit integer, two values packed per byte.
    I4,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 32-bit integer.
    I32,
}

impl DataType {
    /// Size in bytes of one element, for the natural (unpacked) types.
    /// `I4` is not byte-aligned; callers must special-case it via
    /// [`DataType::is_packed`] and size buffers in nibble units.
    pub const fn element_size(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 => 1,
            DataType::I4 => 1, // two elements share this byte
        }
    }

    /// Natural alignment required for this element type.
    pub const fn natural_alignment(self) -> usize {
        self.element_size()
    }

    /// Whether two elements of this type are packed into one byte.
    pub const fn is_packed(self) -> bool {
        matches!(self, DataType::I4)
    }
}

/// Where a tensor's backing memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceLocation {
    /// Ordinary host (CPU) memory.
    Host,
    /// Accelerator-local memory (e.g. NPU/GPU scratchpad), opaque to the host.
    Accelerator,
    /// Memory shared between host and accelerator (e.g. unified memory).
    Shared,
}

/// Tensor shape: up to [`MAX_DIMS`] dimensions, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    dims: [usize; MAX_DIMS],
    ndim: usize,
}

impl Shape {
    /// Builds a shape from a dimension slice (1..=`MAX_DIMS` entries, all
    /// non-zero).
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.len() > MAX_DIMS {
            return Err(LibetudeError::invalid_argument(alloc::format!(
                "shape must have 1..={MAX_DIMS} dims, got {}",
                dims.len()
            )));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(LibetudeError::invalid_argument("shape dims must be non-zero"));
        }
        let mut arr = [1usize; MAX_DIMS];
        arr[..dims.len()].copy_from_slice(dims);
        Ok(Self { dims: arr, ndim: dims.len() })
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// The dimension sizes, in row-major order.
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.ndim]
    }

    /// Total element count: the product of all dims.
    pub fn element_count(&self) -> usize {
        self.dims().iter().product()
    }

    /// Row-major strides (in elements, not bytes) for this shape.
    pub fn row_major_strides(&self) -> Vec<usize> {
        let mut strides = alloc::vec![1usize; self.ndim];
        for i in (0..self.ndim.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }
}

/// A typed, shaped buffer backed by a [`MemoryPool`] allocation.
pub struct Tensor<'p> {
    handle: PoolHandle<'p>,
    shape: Shape,
    strides: Vec<usize>,
    dtype: DataType,
    location: DeviceLocation,
    owns_memory: bool,
}

/// Tensors carrying SIMD-eligible data must align to this many bytes.
pub const SIMD_ALIGNMENT: usize = 32;

impl<'p> Tensor<'p> {
    /// Allocates a new tensor from `pool` with the given `shape`/`dtype`,
    /// located on the host and aligned to at least the element type's
    /// natural alignment (32 bytes if `simd` is requested).
    pub fn create(pool: &'p MemoryPool, shape: Shape, dtype: DataType, simd: bool) -> Result<Self> {
        let byte_len = tensor_byte_len(&shape, dtype)?;
        let align = if simd {
            SIMD_ALIGNMENT
        } else {
            dtype.natural_alignment()
        };
        let handle = pool.allocate_aligned(byte_len, align)?;
        let strides = shape.row_major_strides();
        Ok(Self {
            handle,
            shape,
            strides,
            dtype,
            location: DeviceLocation::Host,
            owns_memory: true,
        })
    }

    /// Builds a non-owning view over `other`'s storage, sharing the backing
    /// allocation. The view's `owns_memory` flag is false: dropping it never
    /// implies releasing the pool allocation (the pool itself is only ever
    /// freed wholesale via `reset`/`reset_to`).
    pub fn view(other: &Tensor<'p>) -> Self {
        Self {
            handle: other.handle,
            shape: other.shape,
            strides: other.strides.clone(),
            dtype: other.dtype,
            location: other.location,
            owns_memory: false,
        }
    }

    /// The tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Device location.
    pub fn location(&self) -> DeviceLocation {
        self.location
    }

    /// Whether this tensor owns (vs. views) its backing store.
    pub fn owns_memory(&self) -> bool {
        self.owns_memory
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.shape.element_count()
    }

    /// Whether the tensor is empty (never true post-construction; kept for
    /// API symmetry).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reshapes in place. Fails with `InvalidArgument` unless the new shape
    /// has the same element count as the old one.
    pub fn reshape(&mut self, new_shape: Shape) -> Result<()> {
        if new_shape.element_count() != self.shape.element_count() {
            return Err(LibetudeError::invalid_argument(alloc::format!(
                "reshape element count mismatch: {} vs {}",
                new_shape.element_count(),
                self.shape.element_count()
            )));
        }
        self.strides = new_shape.row_major_strides();
        self.shape = new_shape;
        Ok(())
    }

    /// Reads out the tensor's f32 contents (only valid for `DataType::F32`).
    pub fn read_f32(&self) -> Result<Vec<f32>> {
        if self.dtype != DataType::F32 {
            return Err(LibetudeError::invalid_argument("read_f32 requires an F32 tensor"));
        }
        let bytes = self.handle.to_vec();
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Writes f32 values into the tensor (only valid for `DataType::F32`);
    /// `values.len()` must equal the tensor's element count.
    pub fn write_f32(&self, values: &[f32]) -> Result<()> {
        if self.dtype != DataType::F32 {
            return Err(LibetudeError::invalid_argument("write_f32 requires an F32 tensor"));
        }
        if values.len() != self.len() {
            return Err(LibetudeError::invalid_argument("write_f32 length mismatch"));
        }
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.handle.write(&bytes);
        Ok(())
    }

    /// Fills the whole tensor with zero bytes.
    pub fn fill_zero(&self) {
        self.handle.fill(0);
    }

    /// Copies `self`'s contents into a freshly allocated tensor in `pool`,
    /// with the same shape/dtype (a contiguous, owning copy).
    pub fn contiguous_copy(&self, pool: &'p MemoryPool) -> Result<Tensor<'p>> {
        let copy = Tensor::create(pool, self.shape, self.dtype, false)?;
        copy.handle.write(&self.handle.to_vec());
        Ok(copy)
    }
}

fn tensor_byte_len(shape: &Shape, dtype: DataType) -> Result<usize> {
    let count = shape.element_count();
    if dtype.is_packed() {
        Ok((count + 1) / 2)
    } else {
        count
            .checked_mul(dtype.element_size())
            .ok_or_else(|| LibetudeError::invalid_argument("tensor byte length overflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_rejects_zero_dims() {
        assert!(Shape::new(&[2, 0, 3]).is_err());
    }

    #[test]
    fn row_major_strides_match_numpy_convention() {
        let shape = Shape::new(&[2, 3, 4]).unwrap();
        assert_eq!(shape.row_major_strides(), alloc::vec![12, 4, 1]);
    }

    #[test]
    fn create_and_round_trip_f32() {
        let pool = MemoryPool::create(4096, 32).unwrap();
        let shape = Shape::new(&[2, 3]).unwrap();
        let tensor = Tensor::create(&pool, shape, DataType::F32, true).unwrap();
        tensor.write_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(tensor.read_f32().unwrap(), alloc::vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn reshape_requires_equal_element_count() {
        let pool = MemoryPool::create(4096, 32).unwrap();
        let shape = Shape::new(&[2, 3]).unwrap();
        let mut tensor = Tensor::create(&pool, shape, DataType::F32, false).unwrap();
        assert!(tensor.reshape(Shape::new(&[3, 2]).unwrap()).is_ok());
        assert!(tensor.reshape(Shape::new(&[4, 4]).unwrap()).is_err());
    }

    #[test]
    fn view_shares_storage_and_does_not_own() {
        let pool = MemoryPool::create(4096, 32).unwrap();
        let shape = Shape::new(&[4]).unwrap();
        let tensor = Tensor::create(&pool, shape, DataType::F32, false).unwrap();
        tensor.write_f32(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let view = Tensor::view(&tensor);
        assert!(!view.owns_memory());
        assert_eq!(view.read_f32().unwrap(), tensor.read_f32().unwrap());
    }
}
