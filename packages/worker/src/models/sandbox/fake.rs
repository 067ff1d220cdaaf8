//! In-memory sandbox for exercising judge compilation and evaluation.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use super::{SandboxController, SandboxError};

const COMPILERS: [&str; 4] = ["gcc ", "g++ ", "go build ", "rustc "];

pub(crate) struct FakeSandbox {
    pub files: HashMap<String, Vec<u8>>,
    pub fresh: bool,
    /// Snapshot reloads actually performed.
    pub reloads: usize,
    pub compiles: usize,
    pub compiler_output: String,
    pub driver: String,
    pub driver_output: Vec<String>,
    pub fail_driver: bool,
    pub monitor_log: Vec<String>,
    pub shell_log: Vec<String>,
}

impl Default for FakeSandbox {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            fresh: true,
            reloads: 0,
            compiles: 0,
            compiler_output: String::new(),
            driver: "/bin/garzon.sh".to_string(),
            driver_output: Vec::new(),
            fail_driver: false,
            monitor_log: Vec::new(),
            shell_log: Vec::new(),
        }
    }
}

impl FakeSandbox {
    pub fn with_driver_output(lines: &[&str]) -> Self {
        Self {
            driver_output: lines.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxController for FakeSandbox {
    async fn reset(&mut self) -> Result<(), SandboxError> {
        if !self.fresh {
            self.reloads += 1;
            self.files.clear();
            self.fresh = true;
        }
        Ok(())
    }

    async fn monitor(&mut self, cmd: &str) -> Result<String, SandboxError> {
        self.fresh = false;
        self.monitor_log.push(cmd.to_string());
        Ok(String::new())
    }

    async fn shell_report(
        &mut self,
        cmd: &str,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, SandboxError> {
        self.fresh = false;
        self.shell_log.push(cmd.to_string());

        if COMPILERS.iter().any(|c| cmd.starts_with(c)) {
            self.compiles += 1;
            if !self.compiler_output.is_empty() {
                return Ok(self.compiler_output.clone());
            }
            let out = cmd
                .split_whitespace()
                .skip_while(|w| *w != "-o")
                .nth(1)
                .unwrap_or("/tmp/judge.bin")
                .trim_matches('\'');
            self.files
                .insert(out.to_string(), format!("binary of {cmd}").into_bytes());
            return Ok(String::new());
        }

        if cmd == self.driver {
            let mut out = String::new();
            for line in &self.driver_output {
                let line = format!("{line}\r");
                on_line(&line);
                out.push_str(&line);
                out.push('\n');
            }
            if self.fail_driver {
                return Err(SandboxError::ProtocolDesync {
                    expected: "marker".to_string(),
                    reason: "end of stream".to_string(),
                    partial: out,
                });
            }
            return Ok(out);
        }

        Ok(String::new())
    }

    async fn copy_to_guest(&mut self, guest_path: &str, host_path: &Path) -> Result<u64, SandboxError> {
        self.fresh = false;
        let data = tokio::fs::read(host_path).await?;
        let len = data.len() as u64;
        self.files.insert(guest_path.to_string(), data);
        Ok(len)
    }

    async fn copy_to_host(&mut self, host_path: &Path, guest_path: &str) -> Result<u64, SandboxError> {
        self.fresh = false;
        let data = self
            .files
            .get(guest_path)
            .ok_or_else(|| SandboxError::Transfer(format!("no such guest file '{guest_path}'")))?;
        tokio::fs::write(host_path, data).await?;
        Ok(data.len() as u64)
    }
}
