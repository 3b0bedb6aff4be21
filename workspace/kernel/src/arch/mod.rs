//! Architecture support. Only IA-32 is implemented; the descriptor-table
//! and task-state types are plain data and build everywhere, while the
//! entry stubs and privileged instructions are target-gated.

pub mod x86;
