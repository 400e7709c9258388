//! Crate-wide error taxonomy, split by subsystem the way the teacher splits
//! `hardware::afe`/adc/dac errors instead of keeping one flat enum.
//!
//! Every variant here corresponds to a row of spec.md §7's error table.
//! None of these are ever raised across the audio ISR boundary: Core A
//! either clamps/falls through silently (overrun, malformed descriptor) or
//! increments a counter: see [`crate::rings::Ring::drop_count`].

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    Compile,
    Runtime,
    StackUnderflow,
    UnknownHost,
    BadArgType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    WriteFailed,
    EraseFailed,
    ScriptTooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplError {
    ChunkTooLong,
    MailboxBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Vm(VmError),
    Flash(FlashError),
    Repl(ReplError),
}

impl From<VmError> for Error {
    fn from(e: VmError) -> Self {
        Error::Vm(e)
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Error::Flash(e)
    }
}

impl From<ReplError> for Error {
    fn from(e: ReplError) -> Self {
        Error::Repl(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Vm(VmError::Compile) => write!(f, "compile error"),
            Error::Vm(VmError::Runtime) => write!(f, "runtime error"),
            Error::Vm(VmError::StackUnderflow) => write!(f, "stack underflow"),
            Error::Vm(VmError::UnknownHost) => write!(f, "unknown host function"),
            Error::Vm(VmError::BadArgType) => write!(f, "bad argument type"),
            Error::Flash(FlashError::WriteFailed) => write!(f, "flash write failed"),
            Error::Flash(FlashError::EraseFailed) => write!(f, "flash erase failed"),
            Error::Flash(FlashError::ScriptTooLarge) => write!(f, "script too large"),
            Error::Repl(ReplError::ChunkTooLong) => write!(f, "chunk too long"),
            Error::Repl(ReplError::MailboxBusy) => write!(f, "mailbox busy"),
        }
    }
}

/// Format an error the way the USB REPL prints it: `!<message>` (spec.md §6
/// "Output framing", §7 "Policy").
pub fn format_usb_line(e: &Error, buf: &mut heapless::String<128>) {
    use core::fmt::Write;
    buf.clear();
    let _ = write!(buf, "!{}", e);
}
