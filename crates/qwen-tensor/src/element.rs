use half::{bf16, f16};

use crate::dtype::DType;

/// A storage element type the compute kernels are monomorphized over.
///
/// All three implementors (`f32`, `half::f16`, `half::bf16`) convert to and
/// from `f32` losslessly-where-possible; every kernel loads its operands
/// with [`Element::to_f32`], accumulates and applies transcendentals in
/// `f32`, and narrows the final result with [`Element::from_f32`] at the
/// point of storage. `f32` itself is the identity conversion.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Widen this element to `f32` for computation.
    fn to_f32(self) -> f32;

    /// Narrow an `f32` compute result to this storage type.
    ///
    /// Narrowing to `f16`/`bf16` rounds to nearest, ties to even, and
    /// preserves `NaN`/`Inf` payloads per IEEE 754 (delegated to the
    /// `half` crate's conversions).
    fn from_f32(v: f32) -> Self;

    /// The `DType` tag corresponding to this storage type.
    fn dtype() -> DType;
}

impl Element for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    fn dtype() -> DType {
        DType::F32
    }
}

impl Element for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    fn dtype() -> DType {
        DType::F16
    }
}

impl Element for bf16 {
    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }

    fn dtype() -> DType {
        DType::Bf16
    }
}

/// Free-function form of [`Element::to_f32`], matching the scalar
/// conversion named in the numeric primitives contract.
#[inline]
pub fn to_f32<T: Element>(x: T) -> f32 {
    x.to_f32()
}

/// Free-function form of [`Element::from_f32`].
#[inline]
pub fn from_f32<T: Element>(x: f32) -> T {
    T::from_f32(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_identity() {
        assert_eq!(to_f32(1.5f32), 1.5f32);
        assert_eq!(from_f32::<f32>(2.25f32), 2.25f32);
    }

    #[test]
    fn f16_roundtrip() {
        let v: f16 = from_f32(1.5f32);
        assert_eq!(to_f32(v), 1.5f32);
    }

    #[test]
    fn bf16_roundtrip() {
        let v: bf16 = from_f32(2.0f32);
        assert_eq!(to_f32(v), 2.0f32);
    }

    #[test]
    fn f16_nan_preserved() {
        let v: f16 = from_f32(f32::NAN);
        assert!(to_f32(v).is_nan());
    }

    #[test]
    fn bf16_nan_preserved() {
        let v: bf16 = from_f32(f32::NAN);
        assert!(to_f32(v).is_nan());
    }

    #[test]
    fn dtype_tags() {
        assert_eq!(f32::dtype(), DType::F32);
        assert_eq!(f16::dtype(), DType::F16);
        assert_eq!(bf16::dtype(), DType::Bf16);
    }
}
