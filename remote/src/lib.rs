//! Shell-subprocess transport for reaching a remote endpoint: running a
//! command over an opaque channel, framing its output against banner
//! noise, and pushing/pulling single files or symlinks.
//!
//! The transport is deliberately generic — any `shell_command` capable
//! of running `<host> <command>` non-interactively (an SSH wrapper, a
//! container exec, a test double) satisfies the contract in `shell`.

pub mod copy;
pub mod marker;
pub mod shell;
