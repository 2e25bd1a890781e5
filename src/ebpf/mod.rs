//! Userspace side of the eBPF programs
//!
//! `events` and the merge helpers in `maps` are platform independent; the
//! loader and the map handles need Linux.

pub mod events;
#[cfg(target_os = "linux")]
pub mod loader;
pub mod maps;

#[cfg(target_os = "linux")]
pub use loader::Firewall;
