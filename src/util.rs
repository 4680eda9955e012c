//! Miscellaneous utility functions.

/// Iterates over `0..count`, starting at `start` and wrapping around.
pub fn rotated_range(count: usize, start: usize) -> impl Iterator<Item = usize> {
    (0..count)
        .map(move |i| i + start)
        .map(move |i| if i >= count { i - count } else { i })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wraps_around() {
        assert_eq!(rotated_range(4, 1).collect::<Vec<_>>(), vec![1, 2, 3, 0]);
        assert_eq!(rotated_range(3, 0).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(rotated_range(0, 0).count(), 0);
    }
}
