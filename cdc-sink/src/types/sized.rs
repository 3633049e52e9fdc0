/// Reports an approximate in-memory size in bytes.
///
/// Sizes feed memory quota accounting, so they must be stable for a given value.
pub trait SizeHint {
    /// Returns the approximate size in bytes for this value.
    fn size_hint(&self) -> usize;
}

impl<T> SizeHint for [T]
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        self.iter()
            .fold(0usize, |total, value| total.saturating_add(value.size_hint()))
    }
}

impl<T> SizeHint for Vec<T>
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        self.as_slice().size_hint()
    }
}

impl<T> SizeHint for Option<T>
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        match self {
            Some(value) => value.size_hint(),
            None => 0,
        }
    }
}
