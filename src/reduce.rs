//! Reduction operators and element types supported by the exchange.

use bytemuck::Pod;

/// Reduction applied when folding received contributions into the halo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Mul,
    Min,
    Max,
}

/// Exchange variant selector.
///
/// `NoTrans` drives the non-symmetric level descriptors and touches only the
/// positively-signed prefix of the halo. `Trans` is the symmetric exchange:
/// every participant contributes and receives. `JustTrans` runs the
/// symmetric exchange but delivers only to the positively-signed prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Transpose {
    NoTrans,
    Trans,
    JustTrans,
}

/// Element types the router can exchange.
///
/// Implementations supply the four reductions and their identities; the
/// `Pod` bound is what lets buffers be reinterpreted for the wire.
pub trait HaloScalar: Pod + PartialOrd + Send + Sync + 'static {
    fn zero() -> Self;
    fn one() -> Self;
    /// Identity of `Min` (the greatest representable value).
    fn max_value() -> Self;
    /// Identity of `Max` (the least representable value).
    fn min_value() -> Self;
    fn add(a: Self, b: Self) -> Self;
    fn mul(a: Self, b: Self) -> Self;
}

macro_rules! impl_halo_scalar_int {
    ($($t:ty),*) => {$(
        impl HaloScalar for $t {
            #[inline] fn zero() -> Self { 0 }
            #[inline] fn one() -> Self { 1 }
            #[inline] fn max_value() -> Self { <$t>::MAX }
            #[inline] fn min_value() -> Self { <$t>::MIN }
            #[inline] fn add(a: Self, b: Self) -> Self { a.wrapping_add(b) }
            #[inline] fn mul(a: Self, b: Self) -> Self { a.wrapping_mul(b) }
        }
    )*};
}

macro_rules! impl_halo_scalar_float {
    ($($t:ty),*) => {$(
        impl HaloScalar for $t {
            #[inline] fn zero() -> Self { 0.0 }
            #[inline] fn one() -> Self { 1.0 }
            #[inline] fn max_value() -> Self { <$t>::INFINITY }
            #[inline] fn min_value() -> Self { <$t>::NEG_INFINITY }
            #[inline] fn add(a: Self, b: Self) -> Self { a + b }
            #[inline] fn mul(a: Self, b: Self) -> Self { a * b }
        }
    )*};
}

impl_halo_scalar_int!(i32, i64, u32, u64);
impl_halo_scalar_float!(f32, f64);

impl ReduceOp {
    /// The value that leaves any operand unchanged under `self`.
    #[inline]
    pub fn identity<T: HaloScalar>(self) -> T {
        match self {
            ReduceOp::Add => T::zero(),
            ReduceOp::Mul => T::one(),
            ReduceOp::Min => T::max_value(),
            ReduceOp::Max => T::min_value(),
        }
    }

    /// Fold `b` into `a`.
    #[inline]
    pub fn apply<T: HaloScalar>(self, a: T, b: T) -> T {
        match self {
            ReduceOp::Add => T::add(a, b),
            ReduceOp::Mul => T::mul(a, b),
            ReduceOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            ReduceOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
        }
    }
}
