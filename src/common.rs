use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::iter;

/// Generates a random string of characters of the given length.
pub fn rand_string(length: usize) -> String {
    let mut rng = thread_rng();
    iter::repeat(())
        .map(|()| rng.sample(Alphanumeric))
        .map(char::from)
        .take(length)
        .collect()
}

/// Generates a random lowercase alphanumeric string of the given length.
///
/// Container names are matched case-insensitively by some runtimes, so
/// name suffixes always use this variant.
pub fn rand_suffix(length: usize) -> String {
    rand_string(length).to_lowercase()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_rand_string() {
        let result = super::rand_string(10);
        assert_eq!(result.len(), 10);
    }

    #[test]
    fn test_rand_suffix_is_lowercase() {
        let result = super::rand_suffix(32);
        assert_eq!(result.len(), 32);
        assert_eq!(result, result.to_lowercase());
    }
}
