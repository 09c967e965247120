//! ADB-backed device driver for emulator containers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::DeviceDriver;
use crate::database::models::{GatewayDbModel, GatewayStatus};
use crate::domain::PhoneNumber;
use crate::{Error, Result};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

/// Drives Android emulators over `adb` (`host:port` serials).
pub struct AdbDriver {
    adb_path: String,
    command_timeout: Duration,
}

impl AdbDriver {
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        debug!(adb = %self.adb_path, ?args, "Running adb");
        let mut cmd = Command::new(&self.adb_path);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| Error::Timeout(format!("adb {}", args.join(" "))))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Other(format!(
                "adb {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn connect(&self, serial: &str) -> Result<()> {
        let out = self.run(&["connect", serial]).await?;
        let text = String::from_utf8_lossy(&out).to_ascii_lowercase();
        if text.contains("connected to") {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "adb connect {} failed: {}",
                serial,
                text.trim()
            )))
        }
    }
}

#[async_trait]
impl DeviceDriver for AdbDriver {
    async fn start_app(&self, gateway: &GatewayDbModel, app_package: &str) -> Result<()> {
        let serial = gateway.serial();
        self.connect(&serial).await?;
        self.run(&[
            "-s",
            serial.as_str(),
            "shell",
            "monkey",
            "-p",
            app_package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await?;
        Ok(())
    }

    async fn simulate_inbound_call(
        &self,
        gateway: &GatewayDbModel,
        number: &PhoneNumber,
    ) -> Result<()> {
        let serial = gateway.serial();
        self.run(&["-s", serial.as_str(), "emu", "gsm", "call", number.digits()])
            .await?;
        Ok(())
    }

    async fn capture_evidence(&self, gateway: &GatewayDbModel) -> Result<Vec<u8>> {
        let serial = gateway.serial();
        let png = self
            .run(&["-s", serial.as_str(), "exec-out", "screencap", "-p"])
            .await?;
        if png.is_empty() {
            return Err(Error::Other(format!("empty screenshot from {}", serial)));
        }
        Ok(png)
    }

    async fn end_call(&self, gateway: &GatewayDbModel, number: &PhoneNumber) -> Result<()> {
        let serial = gateway.serial();
        self.run(&["-s", serial.as_str(), "emu", "gsm", "cancel", number.digits()])
            .await?;
        Ok(())
    }

    async fn probe_status(&self, gateway: &GatewayDbModel) -> GatewayStatus {
        let serial = gateway.serial();
        if let Err(e) = self.connect(&serial).await {
            warn!(gateway = %gateway.name, error = %e, "Gateway unreachable");
            return GatewayStatus::Offline;
        }
        match self.run(&["-s", serial.as_str(), "get-state"]).await {
            Ok(out) if String::from_utf8_lossy(&out).trim() == "device" => GatewayStatus::Online,
            Ok(out) => {
                debug!(gateway = %gateway.name, state = %String::from_utf8_lossy(&out).trim(), "Gateway not ready");
                GatewayStatus::Offline
            }
            Err(e) => {
                warn!(gateway = %gateway.name, error = %e, "Gateway state probe failed");
                GatewayStatus::Offline
            }
        }
    }
}
