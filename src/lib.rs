pub mod constants;
pub mod crypto;
pub mod error;
pub mod errqueue;
pub mod frame;
pub mod options;
pub mod overhead;
pub mod pmtu;

#[cfg(target_os = "linux")]
pub mod link;
#[cfg(target_os = "linux")]
pub mod session;
