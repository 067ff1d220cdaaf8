//! Driving a VM through its serial console.
//!
//! One byte stream carries both the guest shell and the hypervisor monitor.
//! Commands complete when the expected prompt shows up: the process-wide
//! [`Marker`] in shell mode, `"(qemu) "` in monitor mode.

pub mod console;
pub mod error;
pub mod marker;
pub mod qemu;
pub mod reader;
pub mod transfer;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;

use async_trait::async_trait;

pub use console::Console;
pub use error::SandboxError;
pub use marker::Marker;
pub use qemu::{QemuController, VmState};
pub use reader::PromptReader;
pub use transfer::{TransferMode, TransferSettings};

/// Which side of the multiplexed stream has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Console,
    Monitor,
}

/// What evaluation and judge compilation need from a sandbox.
#[async_trait]
pub trait SandboxController: Send {
    /// Bring the guest back to the clean snapshot. No-op when already there.
    async fn reset(&mut self) -> Result<(), SandboxError>;

    /// Run a hypervisor monitor command and return its output.
    async fn monitor(&mut self, cmd: &str) -> Result<String, SandboxError>;

    /// Run a guest shell command, passing each output line to `on_line` as it
    /// arrives. Returns the whole output without the echoed command.
    async fn shell_report(
        &mut self,
        cmd: &str,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, SandboxError>;

    async fn shell(&mut self, cmd: &str) -> Result<String, SandboxError> {
        self.shell_report(cmd, &mut |_: &str| {}).await
    }

    /// Copy a host file into the guest. Returns the byte count.
    async fn copy_to_guest(&mut self, guest_path: &str, host_path: &Path)
    -> Result<u64, SandboxError>;

    /// Copy a guest file to the host. Returns the byte count.
    async fn copy_to_host(&mut self, host_path: &Path, guest_path: &str)
    -> Result<u64, SandboxError>;
}
