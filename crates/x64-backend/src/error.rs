//! Errors the lowering pipeline can report.

use alloc::string::String;

/// A failure surfaced by some stage of the copy-insertion -> liveness ->
/// register-allocation -> selection pipeline.
///
/// Every stage returns `Result`; nothing in this crate panics on malformed
/// or resource-exhausted input (panics are reserved for programmer errors
/// such as indexing a handle that does not belong to the function passed
/// in, same as the `ir` crate itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No physical register was free to satisfy an assignment and this
    /// allocator does not spill (§4.F: "no free registers" is fatal, not a
    /// signal to spill").
    AllocatorExhaustion { function: String },
    /// A use of a value was found to occur, in program order, before that
    /// value's own definition within the same block -- a structurally
    /// malformed program, not something liveness can silently paper over.
    UseBeforeDef { function: String },
    /// A call references more integer arguments than the System V AMD64
    /// register-argument convention has slots for; this backend has no
    /// stack-argument lowering.
    TooManyArguments { function: String, callee: String },
    /// A call targets a function name the unit does not define.
    UnknownCallee { function: String, callee: String },
    /// Copy insertion found a `Copy` already present before it ran -- either
    /// the pass ran twice, or the function was already past this stage.
    CopyInsertionAlreadyRan { function: String },
    /// Instruction selection was handed IR it cannot lower: a virtual
    /// register that register allocation should have already eliminated, or
    /// some other shape §4.G's lowering table has no row for.
    UnsupportedIrShape { function: String, detail: String },
    /// A Load/Store's address operand resolved to RSP or R12: both require
    /// a SIB byte as a `BaseDisp` base, which this encoder does not emit
    /// (§4.H: "the core need not support this and may signal *unsupported
    /// addressing mode*").
    UnsupportedAddressingMode { function: String, base: u32 },
    /// A data-dependent encoding violation (§7): an immediate or branch
    /// displacement produced by selection does not fit the byte form the
    /// encoder chose for it.
    Encoding(x64_encoder::EncodingError),
}

impl core::fmt::Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BackendError::AllocatorExhaustion { function } => {
                write!(f, "{function}: no free physical register (this allocator does not spill)")
            }
            BackendError::UseBeforeDef { function } => {
                write!(f, "{function}: a value is used before it is defined in its block")
            }
            BackendError::TooManyArguments { function, callee } => {
                write!(f, "{function}: call to {callee} passes more arguments than the ABI has registers for")
            }
            BackendError::UnknownCallee { function, callee } => {
                write!(f, "{function}: call references undefined function {callee}")
            }
            BackendError::CopyInsertionAlreadyRan { function } => {
                write!(f, "{function}: a Copy instruction is already present before copy insertion ran")
            }
            BackendError::UnsupportedIrShape { function, detail } => {
                write!(f, "{function}: instruction selection cannot lower this IR: {detail}")
            }
            BackendError::UnsupportedAddressingMode { function, base } => {
                write!(f, "{function}: register {base} as a memory base needs a SIB byte, which this encoder does not emit")
            }
            BackendError::Encoding(err) => write!(f, "encoding failed: {err}"),
        }
    }
}

impl From<x64_encoder::EncodingError> for BackendError {
    fn from(err: x64_encoder::EncodingError) -> Self {
        BackendError::Encoding(err)
    }
}
