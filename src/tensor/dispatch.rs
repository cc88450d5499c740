//! type dispatch and parallel elementwise iteration. Kernels that
//! only care about "some floating point element type" go through
//! [`elementwise_inplace`]; this is the only place `dispatch_dtype!` and
//! `parallel_for` meet.

use crate::dispatch_dtype;
use crate::error::{GPError, GPResult};
use crate::parallel::parallel_for;
use crate::tensor::Tensor;

const GRAIN_SIZE: i64 = 32 * 1024;

/// A raw slab pointer handed to each `parallel_for` chunk. Chunks are
/// disjoint by construction (see `parallel_for`'s contract), so concurrent
/// writes through it never alias; wrapping it lets the per-chunk closure
/// stay `Fn` instead of requiring exclusive capture of the whole slice.
#[derive(Clone, Copy)]
struct SlabPtr(*mut f32);

unsafe impl Send for SlabPtr {}
unsafe impl Sync for SlabPtr {}

/// Applies `f` to every element of a contiguous tensor in place, chunked
/// through `parallel_for`. Non-contiguous tensors are rejected rather than
/// silently materialized, since materializing here would hide an
/// allocation from the caller.
pub fn elementwise_inplace_f32(t: &mut Tensor, f: impl Fn(f32) -> f32 + Sync) -> GPResult<()> {
    require_dispatchable::<f32>(t.dtype())?;
    if !t.is_contiguous() {
        return Err(GPError::RuntimeKernelError(
            "elementwise_inplace requires a contiguous tensor".into(),
        ));
    }
    let numel = t.numel();
    let slice = t.as_slice_mut_f32()?;
    let slab = SlabPtr(slice.as_mut_ptr());
    parallel_for(0, numel, GRAIN_SIZE, |begin, end| {
        for i in begin..end {
            let idx = i as usize;
            // Safe: `parallel_for` hands out disjoint, in-bounds [begin,end)
            // slabs that partition [0, numel), so no two chunks ever touch
            // the same element.
            unsafe {
                let p = slab.0.add(idx);
                *p = f(*p);
            }
        }
        Ok(())
    })
}

/// Checks that a tensor's runtime `dtype` matches the element type `T` a
/// kernel was monomorphized for, by routing through `dispatch_dtype!` and
/// comparing the bound type to `T`. A kernel written only for `f32` calls
/// this as `require_dispatchable::<f32>(t.dtype())` and gets a proper
/// `UnsupportedDType` for anything else, instead of a later panic or a
/// silent byte-reinterpretation.
pub fn require_dispatchable<T: crate::dtype::Element>(dtype: crate::dtype::ScalarType) -> GPResult<()> {
    dispatch_dtype!(dtype, Bound, {
        if std::any::TypeId::of::<Bound>() == std::any::TypeId::of::<T>() {
            Ok(())
        } else {
            Err(GPError::UnsupportedDType(dtype.name().to_string()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ScalarType;

    #[test]
    fn accepts_matching_dtype() {
        require_dispatchable::<f32>(ScalarType::Float).unwrap();
    }

    #[test]
    fn rejects_mismatched_dtype() {
        assert!(require_dispatchable::<f32>(ScalarType::Long).is_err());
        assert!(require_dispatchable::<f32>(ScalarType::Double).is_err());
    }
}
