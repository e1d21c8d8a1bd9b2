//! Constant Implementation

use super::Derivable;

/// An observable that never changes.
///
/// Reading a constant records no dependency and its version is pinned to
/// zero, so it never makes a derivation stale. Useful as a default source
/// where a derivable is expected but nothing varies.
#[derive(Clone, Debug)]
pub struct Constant<T>
where
    T: Clone,
{
    value: T,
}

impl<T> Constant<T>
where
    T: Clone,
{
    /// Create a new constant wrapping `value`.
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Derivable<T> for Constant<T>
where
    T: Clone,
{
    fn get(&self) -> T {
        self.value.clone()
    }

    fn version(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_returns_its_value() {
        let answer = Constant::new(42);
        assert_eq!(answer.get(), 42);
        assert_eq!(answer.get(), 42);
    }

    #[test]
    fn constant_version_is_pinned_to_zero() {
        let answer = Constant::new("fixed");
        assert_eq!(answer.version(), 0);
        let _ = answer.get();
        assert_eq!(answer.version(), 0);
    }
}
