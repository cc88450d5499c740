//! The tensor view: shape, strides and an offset layered over a
//! [`Storage`]. Two tensors built from the same storage (see
//! [`Tensor::alias`]) observe each other's in-place writes; [`Tensor::clone`]
//! (the inherent method, not `std::clone::Clone`) always makes a fresh,
//! contiguous copy.

pub mod dispatch;
pub mod storage;

use rand::distributions::{Distribution, Uniform};

use crate::dtype::ScalarType;
use crate::error::{GPError, GPResult};
use storage::Storage;

pub const MAX_DIMS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFormat {
    Contiguous,
    ChannelsLast,
    Preserve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
}

pub struct Tensor {
    storage: Option<Storage>,
    offset: i64,
    sizes: Vec<i64>,
    strides: Vec<i64>,
    dtype: ScalarType,
    memory_format: MemoryFormat,
}

fn contiguous_strides(sizes: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1];
    }
    strides
}

fn validate_sizes(sizes: &[i64]) -> GPResult<()> {
    if sizes.len() > MAX_DIMS {
        return Err(GPError::ShapeMismatch {
            expected: vec![MAX_DIMS as i64],
            found: vec![sizes.len() as i64],
        });
    }
    if sizes.iter().any(|&s| s < 0) {
        return Err(GPError::ShapeMismatch {
            expected: vec![],
            found: sizes.to_vec(),
        });
    }
    Ok(())
}

fn numel_of(sizes: &[i64]) -> i64 {
    sizes.iter().product()
}

impl Tensor {
    pub fn undefined() -> Tensor {
        Tensor {
            storage: None,
            offset: 0,
            sizes: Vec::new(),
            strides: Vec::new(),
            dtype: ScalarType::Float,
            memory_format: MemoryFormat::Contiguous,
        }
    }

    pub fn defined(&self) -> bool {
        self.storage.is_some()
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.sizes.len()
    }

    pub fn numel(&self) -> i64 {
        numel_of(&self.sizes)
    }

    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    pub fn memory_format(&self) -> MemoryFormat {
        self.memory_format
    }

    pub fn device(&self) -> Device {
        Device::Cpu
    }

    pub fn use_count(&self) -> usize {
        self.storage.as_ref().map(Storage::use_count).unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.storage = None;
        self.sizes.clear();
        self.strides.clear();
        self.offset = 0;
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_strides(&self.sizes)
    }

    /// Cheap view-sharing duplicate: same storage, incremented refcount.
    pub fn alias(&self) -> Tensor {
        Tensor {
            storage: self.storage.clone(),
            offset: self.offset,
            sizes: self.sizes.clone(),
            strides: self.strides.clone(),
            dtype: self.dtype,
            memory_format: self.memory_format,
        }
    }

    /// Deep copy into fresh, contiguous storage. Returns `use_count() == 1`.
    pub fn clone(&self) -> GPResult<Tensor> {
        if !self.defined() {
            return Ok(Tensor::undefined());
        }
        let mut out = Tensor::empty(&self.sizes, self.dtype)?;
        out.copy_(self)?;
        Ok(out)
    }

    pub fn empty(sizes: &[i64], dtype: ScalarType) -> GPResult<Tensor> {
        validate_sizes(sizes)?;
        let numel = numel_of(sizes);
        let nbytes = numel as usize * dtype.size();
        Ok(Tensor {
            storage: Some(Storage::new_zeroed(nbytes, dtype)),
            offset: 0,
            sizes: sizes.to_vec(),
            strides: contiguous_strides(sizes),
            dtype,
            memory_format: MemoryFormat::Contiguous,
        })
    }

    pub fn zeros(sizes: &[i64], dtype: ScalarType) -> GPResult<Tensor> {
        Tensor::empty(sizes, dtype)
    }

    /// Allocates a buffer sized for an arbitrary (possibly non-contiguous)
    /// stride layout rather than assuming `contiguous_strides`. The backing
    /// buffer is sized to the highest byte offset any `(size, stride)` pair
    /// can address, matching how a strided view over dense storage must be
    /// large enough for its widest stride.
    pub fn empty_strided(sizes: &[i64], strides: &[i64], dtype: ScalarType) -> GPResult<Tensor> {
        validate_sizes(sizes)?;
        if sizes.len() != strides.len() {
            return Err(GPError::ShapeMismatch {
                expected: vec![sizes.len() as i64],
                found: vec![strides.len() as i64],
            });
        }
        let numel = numel_of(sizes);
        let required = if numel == 0 {
            0
        } else {
            1 + sizes
                .iter()
                .zip(strides)
                .map(|(&s, &st)| (s - 1).max(0) * st)
                .sum::<i64>()
        };
        let nbytes = required as usize * dtype.size();
        let memory_format =
            if strides == contiguous_strides(sizes) { MemoryFormat::Contiguous } else { MemoryFormat::Preserve };
        Ok(Tensor {
            storage: Some(Storage::new_zeroed(nbytes, dtype)),
            offset: 0,
            sizes: sizes.to_vec(),
            strides: strides.to_vec(),
            dtype,
            memory_format,
        })
    }

    /// Copies `numel(sizes)` elements of `dtype` out of external memory at
    /// `ptr` into a freshly-owned tensor. `Storage` here is always owned, so
    /// ingesting external data means copying it once rather than aliasing
    /// it live.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `numel(sizes) * dtype.size()` bytes.
    pub unsafe fn from_blob(ptr: *const u8, sizes: &[i64], dtype: ScalarType) -> GPResult<Tensor> {
        validate_sizes(sizes)?;
        let numel = numel_of(sizes) as usize;
        let nbytes = numel * dtype.size();
        let bytes = std::slice::from_raw_parts(ptr, nbytes).to_vec();
        Ok(Tensor {
            storage: Some(Storage::from_bytes(bytes, dtype)),
            offset: 0,
            sizes: sizes.to_vec(),
            strides: contiguous_strides(sizes),
            dtype,
            memory_format: MemoryFormat::Contiguous,
        })
    }

    /// Uniform random fill in `[-bound, bound)`. Only `Float` is supported
    /// today; used by `Layer::init_model` weight synthesis.
    pub fn rand_f32(sizes: &[i64], bound: f32) -> GPResult<Tensor> {
        let mut t = Tensor::empty(sizes, ScalarType::Float)?;
        let dist = Uniform::new(-bound, bound);
        let mut rng = rand::thread_rng();
        for v in t.as_slice_mut_f32()? {
            *v = dist.sample(&mut rng);
        }
        Ok(t)
    }

    pub fn from_f32_slice(data: &[f32], shape: &[i64]) -> GPResult<Tensor> {
        let mut t = Tensor::empty(shape, ScalarType::Float)?;
        if data.len() as i64 != t.numel() {
            return Err(GPError::ShapeMismatch {
                expected: vec![t.numel()],
                found: vec![data.len() as i64],
            });
        }
        t.as_slice_mut_f32()?.copy_from_slice(data);
        Ok(t)
    }

    /// Builds a 1-D `Long` tensor from `data`, used to carry an integer
    /// shape vector (e.g. `OUTPUT_SHAPE_HINT`) through a `ParamDict`.
    pub fn from_i64_slice(data: &[i64]) -> GPResult<Tensor> {
        let numel = data.len();
        let mut bytes = vec![0u8; numel * ScalarType::Long.size()];
        for (chunk, v) in bytes.chunks_mut(8).zip(data.iter()) {
            chunk.copy_from_slice(&v.to_ne_bytes());
        }
        Ok(Tensor {
            storage: Some(Storage::from_bytes(bytes, ScalarType::Long)),
            offset: 0,
            sizes: vec![numel as i64],
            strides: contiguous_strides(&[numel as i64]),
            dtype: ScalarType::Long,
            memory_format: MemoryFormat::Contiguous,
        })
    }

    pub fn as_slice_i64(&self) -> GPResult<&[i64]> {
        if self.dtype != ScalarType::Long {
            return Err(GPError::UnsupportedDType(self.dtype.name().to_string()));
        }
        self.require_contiguous()?;
        let storage = self.storage.as_ref().ok_or_else(|| {
            GPError::RuntimeKernelError("read from an undefined tensor".into())
        })?;
        let bytes = storage.as_slice();
        let start = self.offset as usize * 8;
        let len = self.numel() as usize;
        Ok(bytemuck_cast_slice_i64(&bytes[start..start + len * 8]))
    }

    fn require_float(&self) -> GPResult<()> {
        if self.dtype != ScalarType::Float {
            return Err(GPError::UnsupportedDType(self.dtype.name().to_string()));
        }
        Ok(())
    }

    fn require_contiguous(&self) -> GPResult<()> {
        if !self.is_contiguous() {
            return Err(GPError::RuntimeKernelError(
                "operation requires a contiguous tensor".into(),
            ));
        }
        Ok(())
    }

    pub fn as_slice_f32(&self) -> GPResult<&[f32]> {
        self.require_float()?;
        self.require_contiguous()?;
        let storage = self.storage.as_ref().ok_or_else(|| {
            GPError::RuntimeKernelError("read from an undefined tensor".into())
        })?;
        let bytes = storage.as_slice();
        let start = self.offset as usize * 4;
        let len = self.numel() as usize;
        let floats: &[f32] = bytemuck_cast_slice(&bytes[start..start + len * 4]);
        Ok(floats)
    }

    pub fn as_slice_mut_f32(&mut self) -> GPResult<&mut [f32]> {
        self.require_float()?;
        self.require_contiguous()?;
        let offset = self.offset as usize;
        let numel = self.numel() as usize;
        let storage = self.storage.as_mut().ok_or_else(|| {
            GPError::RuntimeKernelError("write to an undefined tensor".into())
        })?;
        let bytes = storage.make_mut();
        let start = offset * 4;
        let floats: &mut [f32] = bytemuck_cast_slice_mut(&mut bytes[start..start + numel * 4]);
        Ok(floats)
    }

    pub fn copy_(&mut self, src: &Tensor) -> GPResult<()> {
        if self.sizes != src.sizes {
            return Err(GPError::ShapeMismatch {
                expected: self.sizes.clone(),
                found: src.sizes.clone(),
            });
        }
        if self.dtype != src.dtype {
            return Err(GPError::UnsupportedDType(src.dtype.name().to_string()));
        }
        let src_slice = src.as_slice_f32()?.to_vec();
        self.as_slice_mut_f32()?.copy_from_slice(&src_slice);
        Ok(())
    }

    /// dtype / memory-format conversion. Same-dtype, same-format calls are
    /// a no-op alias; anything else materializes a fresh contiguous copy.
    pub fn to(&self, dtype: ScalarType, memory_format: MemoryFormat) -> GPResult<Tensor> {
        if dtype == self.dtype
            && (memory_format == MemoryFormat::Preserve || memory_format == self.memory_format)
        {
            return Ok(self.alias());
        }
        match (self.dtype, dtype) {
            (ScalarType::Float, ScalarType::Float) => self.clone(),
            (ScalarType::Float, ScalarType::Double) => {
                let src = self.as_slice_f32()?;
                let data: Vec<f64> = src.iter().map(|&v| v as f64).collect();
                tensor_f64(&data, &self.sizes)
            }
            _ => Err(GPError::UnsupportedDType(format!(
                "conversion {} -> {}",
                self.dtype, dtype
            ))),
        }
    }
}

fn tensor_f64(data: &[f64], shape: &[i64]) -> GPResult<Tensor> {
    let numel = numel_of(shape) as usize;
    if data.len() != numel {
        return Err(GPError::ShapeMismatch {
            expected: vec![numel as i64],
            found: vec![data.len() as i64],
        });
    }
    let mut bytes = vec![0u8; numel * 8];
    for (chunk, v) in bytes.chunks_mut(8).zip(data.iter()) {
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
    Ok(Tensor {
        storage: Some(Storage::from_bytes(bytes, ScalarType::Double)),
        offset: 0,
        sizes: shape.to_vec(),
        strides: contiguous_strides(shape),
        dtype: ScalarType::Double,
        memory_format: MemoryFormat::Contiguous,
    })
}

fn bytemuck_cast_slice(bytes: &[u8]) -> &[f32] {
    debug_assert_eq!(bytes.len() % 4, 0);
    // Safe: byte buffer is always allocated at f32 alignment granularity
    // (Storage is byte-addressed but every f32 tensor is built through
    // `empty`, which sizes the buffer in whole elements).
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, bytes.len() / 4) }
}

fn bytemuck_cast_slice_mut(bytes: &mut [u8]) -> &mut [f32] {
    debug_assert_eq!(bytes.len() % 4, 0);
    unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut f32, bytes.len() / 4) }
}

fn bytemuck_cast_slice_i64(bytes: &[u8]) -> &[i64] {
    debug_assert_eq!(bytes.len() % 8, 0);
    // Safe: every `Long` tensor is built through `from_i64_slice`, which
    // sizes the buffer in whole i64 elements.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const i64, bytes.len() / 8) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_clone_has_use_count_one() {
        let t = Tensor::zeros(&[2, 3], ScalarType::Float).unwrap();
        let cloned = t.clone().unwrap();
        assert_eq!(cloned.use_count(), 1);
    }

    #[test]
    fn alias_shares_storage() {
        let t = Tensor::zeros(&[2, 3], ScalarType::Float).unwrap();
        let a = t.alias();
        assert_eq!(t.use_count(), 2);
        assert_eq!(a.use_count(), 2);
        drop(a);
        assert_eq!(t.use_count(), 1);
    }

    #[test]
    fn rejects_rank_overflow() {
        let sizes = vec![1i64; MAX_DIMS + 1];
        assert!(Tensor::empty(&sizes, ScalarType::Float).is_err());
    }

    #[test]
    fn copy_round_trips_values() {
        let src = Tensor::from_f32_slice(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let mut dst = Tensor::zeros(&[2, 2], ScalarType::Float).unwrap();
        dst.copy_(&src).unwrap();
        assert_eq!(dst.as_slice_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn empty_strided_matches_contiguous_for_dense_strides() {
        let sizes = [2i64, 3];
        let t = Tensor::empty_strided(&sizes, &contiguous_strides(&sizes), ScalarType::Float).unwrap();
        assert!(t.is_contiguous());
        assert_eq!(t.memory_format(), MemoryFormat::Contiguous);
    }

    #[test]
    fn empty_strided_sizes_buffer_for_widest_stride() {
        // A transposed 2x3 view: logical sizes [3, 2], strides [1, 3] reach
        // byte offset (3-1)*1 + (2-1)*3 = 5, so the backing buffer needs 6
        // elements even though only 6 of them are ever addressed once each.
        let t = Tensor::empty_strided(&[3, 2], &[1, 3], ScalarType::Float).unwrap();
        assert!(!t.is_contiguous());
        assert_eq!(t.memory_format(), MemoryFormat::Preserve);
    }

    #[test]
    fn from_blob_copies_external_bytes() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let t = unsafe { Tensor::from_blob(data.as_ptr() as *const u8, &[2, 2], ScalarType::Float).unwrap() };
        assert_eq!(t.as_slice_f32().unwrap(), &data);
    }

    #[test]
    fn i64_slice_round_trips() {
        let t = Tensor::from_i64_slice(&[1, 1, 4, 4]).unwrap();
        assert_eq!(t.as_slice_i64().unwrap(), &[1, 1, 4, 4]);
    }
}
