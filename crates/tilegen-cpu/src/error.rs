use thiserror::Error;
use tilegen_ir::Elem;

/// Errors that can occur while executing a kernel program on the host.
#[derive(Error, Clone, PartialEq)]
pub enum ExecutionError {
    /// An unmasked lane addressed memory outside of its buffer.
    #[error(
        "Out of bounds access at offset {offset} of buffer {buffer} holding {len} elements, \
         in `{instruction}`"
    )]
    OutOfBounds {
        buffer: usize,
        offset: i64,
        len: usize,
        instruction: String,
    },

    /// An integer division or remainder by zero.
    #[error("Division by zero in `{instruction}`")]
    DivisionByZero { instruction: String },

    /// Fewer buffers than kernel arguments were provided.
    #[error("No buffer bound to argument {index}, only {available} buffers provided")]
    MissingBuffer { index: usize, available: usize },

    /// A buffer doesn't hold the elements its argument points to.
    #[error("Buffer {index} holds {actual} elements but the argument points to {expected}")]
    BufferType {
        index: usize,
        expected: Elem,
        actual: Elem,
    },

    /// The program can't be executed as written.
    #[error("Invalid operation `{instruction}`\nCaused by:\n  {reason}")]
    InvalidOperation { instruction: String, reason: String },
}

impl core::fmt::Debug for ExecutionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}
