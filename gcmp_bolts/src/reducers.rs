//! Reducers fold a freshly observed map value into an existing one.

/// A `Reducer` function is used to aggregate values for the novelty search
pub trait Reducer<T> {
    /// Reduce two values to one value, with the current [`Reducer`].
    fn reduce(first: T, second: T) -> T;
}

/// A [`MinReducer`] reduces int values and returns their minimum.
#[derive(Clone, Debug)]
pub struct MinReducer {}

impl<T> Reducer<T> for MinReducer
where
    T: PartialOrd,
{
    #[inline]
    fn reduce(first: T, second: T) -> T {
        if first < second { first } else { second }
    }
}
