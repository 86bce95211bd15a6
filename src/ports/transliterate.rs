/// Port for rewriting display text into the target alphabet used on disk.
///
/// Implementations live in `services::transliterate`.
#[cfg_attr(test, mockall::automock)]
pub trait Transliterator: Send + Sync {
    fn transliterate(&self, text: &str) -> String;
}
