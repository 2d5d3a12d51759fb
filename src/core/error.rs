// This module defines error types for the machinist backend using the thiserror
// crate for idiomatic Rust error handling. CodegenError covers the recoverable
// tier of failures: assembler errors bubbling up from iced-x86, label
// bookkeeping problems, and buffer finalization failures. The module also
// provides CodegenResult<T> as a convenience alias. The second error tier --
// internal contract violations such as an operand kind that does not match its
// opcode, a frame queried before finalization, or an opcode the target cannot
// emit -- is deliberately NOT represented here: those are bugs in an upstream
// pass and abort immediately via panic with diagnostic context, never a
// recoverable Result.

//! Error types for code generation.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for code generation.
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Label error: {reason}")]
    Label { reason: String },

    #[error("Code buffer finalization failed: {reason}")]
    Finalize { reason: String },
}

impl From<iced_x86::IcedError> for CodegenError {
    fn from(err: iced_x86::IcedError) -> Self {
        CodegenError::Assembly(err.to_string())
    }
}

/// Result type alias for code generation operations.
pub type CodegenResult<T> = Result<T, CodegenError>;
