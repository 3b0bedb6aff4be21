//! Kernel error codes (no_std).
//!
//! System calls return a signed word in the accumulator: non-negative on
//! success, `-code` on failure. The codes are stable integers.

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const E_BAD_ENV: i32 = 2;
pub const E_INVAL: i32 = 3;
pub const E_NO_MEM: i32 = 4;
pub const E_NO_FREE_ENV: i32 = 5;
pub const E_FAULT: i32 = 6;
pub const E_IPC_NOT_RECV: i32 = 7;
pub const E_NO_SYS: i32 = 8;

/// Kernel error type shared by the syscall surface and user programs.
///
/// Discriminants are the stable error codes. The `Unknown` catch-all
/// variant preserves unrecognized codes for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum Error {
    #[error("bad environment")]
    BadEnv = E_BAD_ENV,
    #[error("invalid parameter")]
    Inval = E_INVAL,
    #[error("out of memory")]
    NoMem = E_NO_MEM,
    #[error("out of environments")]
    NoFreeEnv = E_NO_FREE_ENV,
    #[error("memory fault")]
    Fault = E_FAULT,
    #[error("env is not recving")]
    IpcNotRecv = E_IPC_NOT_RECV,
    #[error("no such system call")]
    NoSys = E_NO_SYS,
    #[error("unknown error (code={0})")]
    #[num_enum(catch_all)]
    Unknown(i32),
}

impl Error {
    /// The positive stable code for this error.
    #[inline]
    pub fn code(self) -> i32 {
        i32::from(self)
    }

    /// The value placed in the accumulator on syscall exit.
    #[inline]
    pub fn to_ret(self) -> i32 {
        -self.code()
    }

    /// Build an error from a positive stable code.
    ///
    /// Never panics: the `#[num_enum(catch_all)]` variant guarantees
    /// exhaustive mapping; unrecognized codes land in `Unknown(n)`.
    #[inline]
    pub fn from_code(code: i32) -> Self {
        Self::try_from(code).unwrap_or(Error::Unknown(code))
    }

    /// Demultiplex a raw syscall return value.
    #[inline]
    pub fn demux(ret: i32) -> core::result::Result<i32, Error> {
        if ret < 0 {
            Err(Error::from_code(-ret))
        } else {
            Ok(ret)
        }
    }

    /// Short code name for logging (no allocation).
    pub fn name(self) -> &'static str {
        match self {
            Error::BadEnv => "E_BAD_ENV",
            Error::Inval => "E_INVAL",
            Error::NoMem => "E_NO_MEM",
            Error::NoFreeEnv => "E_NO_FREE_ENV",
            Error::Fault => "E_FAULT",
            Error::IpcNotRecv => "E_IPC_NOT_RECV",
            Error::NoSys => "E_NO_SYS",
            Error::Unknown(_) => "E_???",
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
