use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, instrument, warn};

use super::console::Console;
use super::error::SandboxError;
use super::marker::Marker;
use super::transfer::TransferSettings;
use super::SandboxController;
use crate::config::{TransferConfig, VmConfig};

const SIDE_CHANNEL_ID: &str = "grz";
const SIDE_CHANNEL_SOCKET: &str = "serial.sock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Stopped,
    Starting,
    Ready,
}

/// One hypervisor process driven through its stdio.
pub struct QemuController {
    vm: VmConfig,
    transfer: TransferSettings,
    marker: Marker,
    state: VmState,
    child: Option<Child>,
    console: Option<Console<ChildStdin, ChildStdout>>,
}

impl QemuController {
    pub fn new(vm: VmConfig, transfer: &TransferConfig, work_dir: &Path, marker: Marker) -> Self {
        let transfer = TransferSettings {
            mode: transfer.mode,
            socket: side_channel_socket(work_dir),
            device: transfer.device.clone(),
            chunk_limit: transfer.chunk_limit,
        };
        Self {
            vm,
            transfer,
            marker,
            state: VmState::Stopped,
            child: None,
            console: None,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn socket_path(&self) -> &Path {
        &self.transfer.socket
    }

    /// Hypervisor arguments. `resume` starts from the clean snapshot.
    pub fn args(&self, resume: bool) -> Vec<String> {
        let root = self.vm.root();
        let asset = |name: &str| -> String { root.join(name).to_string_lossy().into_owned() };

        let mut args = vec![
            "-kernel".to_string(),
            asset(&self.vm.kernel),
            "-initrd".to_string(),
            asset(&self.vm.initrd),
            "-append".to_string(),
            self.vm.append.clone(),
            "-drive".to_string(),
            format!("file={},if=virtio", asset(&self.vm.image)),
            "-m".to_string(),
            self.vm.memory_mb.to_string(),
            "-serial".to_string(),
            "mon:stdio".to_string(),
            "-nographic".to_string(),
            "-net".to_string(),
            "none".to_string(),
            "-device".to_string(),
            "virtio-serial".to_string(),
            "-chardev".to_string(),
            format!(
                "socket,path={},server=on,wait=off,id={SIDE_CHANNEL_ID}",
                self.transfer.socket.display()
            ),
            "-device".to_string(),
            format!("virtserialport,chardev={SIDE_CHANNEL_ID},name=grz.0"),
        ];
        if resume {
            args.push("-loadvm".to_string());
            args.push(self.vm.snapshot.clone());
        }
        args
    }

    async fn launch(&mut self, resume: bool) -> Result<(), SandboxError> {
        if self.state != VmState::Stopped {
            return Err(SandboxError::Launch("VM already started".to_string()));
        }
        let _ = tokio::fs::remove_file(&self.transfer.socket).await;

        info!(image = %self.vm.image, resume, "Starting VM");
        self.state = VmState::Starting;
        let mut child = Command::new(&self.vm.kvm_bin)
            .args(self.args(resume))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.state = VmState::Stopped;
                SandboxError::Launch(format!("cannot execute '{}': {e}", self.vm.kvm_bin))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.state = VmState::Stopped;
            return Err(SandboxError::Launch(
                "cannot attach to VM stdio".to_string(),
            ));
        };

        let console = Console::new(stdin, stdout, self.marker.clone())
            .with_timeout(self.vm.command_timeout())
            .with_snapshot(self.vm.snapshot.clone())
            .with_transfer(self.transfer.clone());
        self.child = Some(child);
        self.console = Some(console);
        Ok(())
    }

    /// Cold boot, then take over the guest prompt.
    #[instrument(skip(self))]
    pub async fn boot(&mut self) -> Result<(), SandboxError> {
        self.launch(false).await?;
        let boot_prompt = self.vm.boot_prompt.clone();
        let result = async {
            let console = self.starting_console()?;
            console.wait_for(&boot_prompt).await?;
            console.set_prompt().await?;
            console.resync().await
        }
        .await;
        self.finish_start(result).await
    }

    /// Start directly from the clean snapshot.
    #[instrument(skip(self))]
    pub async fn resume(&mut self) -> Result<(), SandboxError> {
        self.launch(true).await?;
        let result = async {
            let console = self.starting_console()?;
            console.set_prompt().await?;
            console.resync().await?;
            console.mark_fresh();
            Ok::<(), SandboxError>(())
        }
        .await;
        self.finish_start(result).await
    }

    /// Replace the clean snapshot with the current state.
    pub async fn save(&mut self) -> Result<(), SandboxError> {
        self.console()?.save().await
    }

    /// Stop the hypervisor and wait for it to exit.
    pub async fn quit(&mut self) -> Result<(), SandboxError> {
        if let Some(console) = self.console.as_mut() {
            if let Err(e) = console.quit().await {
                warn!(error = %e, "Monitor quit failed, killing VM");
                if let Some(child) = self.child.as_mut() {
                    let _ = child.start_kill();
                }
            }
        }
        self.console = None;
        self.state = VmState::Stopped;

        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            info!(%status, "VM exited");
        }
        Ok(())
    }

    fn starting_console(&mut self) -> Result<&mut Console<ChildStdin, ChildStdout>, SandboxError> {
        self.console.as_mut().ok_or(SandboxError::NotRunning)
    }

    async fn finish_start(&mut self, result: Result<(), SandboxError>) -> Result<(), SandboxError> {
        match result {
            Ok(()) => {
                self.state = VmState::Ready;
                info!("VM ready");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "VM failed to start");
                self.console = None;
                if let Some(mut child) = self.child.take() {
                    let _ = child.kill().await;
                }
                self.state = VmState::Stopped;
                Err(e)
            }
        }
    }

    fn console(&mut self) -> Result<&mut Console<ChildStdin, ChildStdout>, SandboxError> {
        if self.state != VmState::Ready {
            return Err(SandboxError::NotRunning);
        }
        self.console.as_mut().ok_or(SandboxError::NotRunning)
    }
}

#[async_trait]
impl SandboxController for QemuController {
    async fn reset(&mut self) -> Result<(), SandboxError> {
        self.console()?.reset().await
    }

    async fn monitor(&mut self, cmd: &str) -> Result<String, SandboxError> {
        self.console()?.monitor(cmd).await
    }

    async fn shell_report(
        &mut self,
        cmd: &str,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, SandboxError> {
        self.console()?.shell_report(cmd, on_line).await
    }

    async fn copy_to_guest(&mut self, guest_path: &str, host_path: &Path) -> Result<u64, SandboxError> {
        self.console()?.copy_to_guest(guest_path, host_path).await
    }

    async fn copy_to_host(&mut self, host_path: &Path, guest_path: &str) -> Result<u64, SandboxError> {
        self.console()?.copy_to_host(host_path, guest_path).await
    }
}

/// Where the side-channel socket lives for a given work directory.
pub fn side_channel_socket(work_dir: &Path) -> PathBuf {
    work_dir.join(SIDE_CHANNEL_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sandbox::TransferMode;

    fn controller() -> QemuController {
        let vm = VmConfig {
            root: Some("/srv/vms".into()),
            ..Default::default()
        };
        QemuController::new(
            vm,
            &TransferConfig::default(),
            Path::new("/tmp/grz-work"),
            Marker::from("m"),
        )
    }

    #[test]
    fn test_args_cold_boot() {
        let args = controller().args(false);
        let joined = args.join(" ");
        assert!(joined.contains("-kernel /srv/vms/vmlinuz"));
        assert!(joined.contains("-drive file=/srv/vms/garzon.qcow2,if=virtio"));
        assert!(joined.contains("-serial mon:stdio"));
        assert!(joined.contains("-net none"));
        assert!(joined.contains("socket,path=/tmp/grz-work/serial.sock,server=on,wait=off,id=grz"));
        assert!(!args.contains(&"-loadvm".to_string()));
        // The kernel command line is a single argument.
        assert!(args.contains(&"tce=vda kmap=qwerty/es vga=788 nodhcp".to_string()));
    }

    #[test]
    fn test_args_resume_loads_snapshot() {
        let args = controller().args(true);
        assert_eq!(&args[args.len() - 2..], ["-loadvm", "grz"]);
    }

    #[test]
    fn test_socket_in_work_dir() {
        let controller = controller();
        assert_eq!(
            controller.socket_path(),
            side_channel_socket(Path::new("/tmp/grz-work"))
        );
        assert_eq!(controller.transfer.mode, TransferMode::Stream);
    }

    #[tokio::test]
    async fn test_commands_need_running_vm() {
        let mut controller = controller();
        assert_eq!(controller.state(), VmState::Stopped);
        let err = controller.shell("true").await.unwrap_err();
        assert!(matches!(err, SandboxError::NotRunning));
    }

    #[tokio::test]
    async fn test_missing_hypervisor_is_launch_error() {
        let mut controller = QemuController::new(
            VmConfig {
                kvm_bin: "/nonexistent/kvm".into(),
                ..Default::default()
            },
            &TransferConfig::default(),
            Path::new("/tmp/grz-work"),
            Marker::from("m"),
        );
        let err = controller.boot().await.unwrap_err();
        assert!(matches!(err, SandboxError::Launch(_)));
        assert_eq!(controller.state(), VmState::Stopped);
    }
}
