#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("string of {len} bytes exceeds the 4 GiB - 1 limit")]
    TooLong { len: usize },

    #[error("string handle no longer refers to a live string")]
    StaleString,

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}
