//! Environment lifecycle states, visible to user space through
//! `sys_env_set_status`.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Lifecycle state of an environment.
///
/// `Dying` is an intermediate state: an environment destroyed while
/// running on another CPU is marked `Dying` and reaped on that CPU's next
/// kernel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum EnvStatus {
    Free = 0,
    Dying = 1,
    Runnable = 2,
    Running = 3,
    NotRunnable = 4,
}
