use std::path::PathBuf;
use std::time::Duration;

use common::config::{ENV_PREFIX, LinkConfig, config_path, split_search_path};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::sandbox::TransferMode;

/// Worker process configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Broker address for worker links. Default: "127.0.0.1:6060".
    #[serde(default = "default_broker_addr")]
    pub broker_addr: String,
    /// Scratch directory for staging trees, media and the side-channel socket.
    /// Default: "<tmp>/garzon-worker".
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Compiled judge cache. Default: "~/.grz/judges".
    #[serde(default)]
    pub cache_dir: Option<String>,
    /// Local problem roots. Falls back to `GARZON_PATH`, then ".".
    #[serde(default)]
    pub problems_path: Option<String>,
    /// First reconnect delay in milliseconds. Default: 1000.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Longest reconnect delay in milliseconds. Default: 5000.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_broker_addr() -> String {
    "127.0.0.1:6060".into()
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    5000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_addr: default_broker_addr(),
            work_dir: None,
            cache_dir: None,
            problems_path: None,
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("garzon-worker"),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".grz")
                .join("judges"),
        }
    }

    pub fn problem_roots(&self) -> Vec<PathBuf> {
        let env_path = std::env::var("GARZON_PATH").ok();
        split_search_path(self.problems_path.as_deref().or(env_path.as_deref()))
    }
}

/// Hypervisor launch settings.
#[derive(Debug, Deserialize, Clone)]
pub struct VmConfig {
    /// Hypervisor executable. Default: "kvm".
    #[serde(default = "default_kvm_bin")]
    pub kvm_bin: String,
    /// Directory holding kernel, initrd and disk images. Falls back to `GARZON_VMS`.
    #[serde(default)]
    pub root: Option<String>,
    /// Disk image file under `root`. Must support snapshots. Default: "garzon.qcow2".
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_kernel")]
    pub kernel: String,
    #[serde(default = "default_initrd")]
    pub initrd: String,
    /// Kernel command line.
    #[serde(default = "default_append")]
    pub append: String,
    /// Guest memory in MiB. Default: 256.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    /// Text the guest shell prints once a cold boot is done. Default: "$ ".
    #[serde(default = "default_boot_prompt")]
    pub boot_prompt: String,
    /// Name of the clean snapshot. Default: "grz".
    #[serde(default = "default_snapshot")]
    pub snapshot: String,
    /// Longest wait for any single prompt, 0 to wait forever. Default: 300.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_kvm_bin() -> String {
    "kvm".into()
}
fn default_image() -> String {
    "garzon.qcow2".into()
}
fn default_kernel() -> String {
    "vmlinuz".into()
}
fn default_initrd() -> String {
    "initrd.gz".into()
}
fn default_append() -> String {
    "tce=vda kmap=qwerty/es vga=788 nodhcp".into()
}
fn default_memory_mb() -> u32 {
    256
}
fn default_boot_prompt() -> String {
    "$ ".into()
}
fn default_snapshot() -> String {
    "grz".into()
}
fn default_command_timeout_secs() -> u64 {
    300
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            kvm_bin: default_kvm_bin(),
            root: None,
            image: default_image(),
            kernel: default_kernel(),
            initrd: default_initrd(),
            append: default_append(),
            memory_mb: default_memory_mb(),
            boot_prompt: default_boot_prompt(),
            snapshot: default_snapshot(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl VmConfig {
    pub fn root(&self) -> PathBuf {
        match &self.root {
            Some(root) => PathBuf::from(root),
            None => std::env::var_os("GARZON_VMS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

/// Host/guest file transfer settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    /// "stream" over the virtio-serial port, or "chunked" base64 over the console.
    #[serde(default)]
    pub mode: TransferMode,
    /// Guest device node of the side channel. Default: "/dev/vport0p1".
    #[serde(default = "default_device")]
    pub device: String,
    /// Base64 characters per shell command in chunked mode. Default: 512.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
}

fn default_device() -> String {
    "/dev/vport0p1".into()
}
fn default_chunk_limit() -> usize {
    crate::models::sandbox::transfer::CHUNK_LIMIT
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::default(),
            device: default_device(),
            chunk_limit: default_chunk_limit(),
        }
    }
}

/// Removable media presented to the guest for each evaluation.
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_genisoimage_bin")]
    pub genisoimage_bin: String,
    /// Monitor device name of the CD-ROM drive. Default: "ide1-cd0".
    #[serde(default = "default_slot")]
    pub slot: String,
    /// Owner of every file on the image, the guest's judging user. Default: 5000.
    #[serde(default = "default_uid")]
    pub uid: u32,
    /// Octal mode of every file on the image. Default: "0500".
    #[serde(default = "default_file_mode")]
    pub file_mode: String,
    /// Guest-side evaluation driver. Default: "/bin/garzon.sh".
    #[serde(default = "default_driver")]
    pub driver: String,
}

fn default_genisoimage_bin() -> String {
    "genisoimage".into()
}
fn default_slot() -> String {
    "ide1-cd0".into()
}
fn default_uid() -> u32 {
    5000
}
fn default_file_mode() -> String {
    "0500".into()
}
fn default_driver() -> String {
    "/bin/garzon.sh".into()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            genisoimage_bin: default_genisoimage_bin(),
            slot: default_slot(),
            uid: default_uid(),
            file_mode: default_file_mode(),
            driver: default_driver(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub vm: VmConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

impl WorkerAppConfig {
    /// Load from `path` (or `GARZON_CONFIG`, or "config/worker") and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(|| config_path("config/worker"), str::to_string);

        let s = Config::builder()
            .set_default("worker.broker_addr", default_broker_addr())?
            .set_default("vm.kvm_bin", default_kvm_bin())?
            .set_default("vm.image", default_image())?
            .set_default("transfer.mode", "stream")?
            .add_source(File::with_name(&path).required(false))
            // e.g. GARZON__TRANSFER__MODE=chunked
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerAppConfig::default();
        assert_eq!(config.worker.broker_addr, "127.0.0.1:6060");
        assert_eq!(config.transfer.mode, TransferMode::Stream);
        assert_eq!(config.transfer.chunk_limit, 512);
        assert_eq!(config.media.slot, "ide1-cd0");
        assert_eq!(config.vm.command_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let vm = VmConfig {
            command_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(vm.command_timeout(), None);
    }

    #[test]
    fn test_explicit_dirs() {
        let worker = WorkerConfig {
            work_dir: Some("/var/lib/grz".into()),
            cache_dir: Some("/var/cache/grz".into()),
            ..Default::default()
        };
        assert_eq!(worker.work_dir(), PathBuf::from("/var/lib/grz"));
        assert_eq!(worker.cache_dir(), PathBuf::from("/var/cache/grz"));
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("worker.toml");
        std::fs::write(
            &file,
            "[transfer]\nmode = \"chunked\"\n\n[vm]\nimage = \"test.qcow2\"\n",
        )
        .unwrap();

        let config = WorkerAppConfig::load(Some(file.to_str().unwrap())).unwrap();
        assert_eq!(config.transfer.mode, TransferMode::Chunked);
        assert_eq!(config.vm.image, "test.qcow2");
        assert_eq!(config.vm.kernel, "vmlinuz");
    }
}
