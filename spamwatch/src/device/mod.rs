//! Device gateway capabilities.
//!
//! The check service drives gateways only through [`DeviceDriver`] and turns captured
//! evidence into text through [`TextExtractor`]. The shipped implementations shell out
//! to `adb` and `tesseract`.

mod adb;
mod ocr;

pub use adb::AdbDriver;
pub use ocr::TesseractExtractor;

use async_trait::async_trait;

use crate::Result;
use crate::database::models::{GatewayDbModel, GatewayStatus};
use crate::domain::PhoneNumber;

/// Primitive actions against one device gateway.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Make sure the device is connected and the provider app is in the foreground.
    async fn start_app(&self, gateway: &GatewayDbModel, app_package: &str) -> Result<()>;

    /// Ring the device as if `number` were calling.
    async fn simulate_inbound_call(&self, gateway: &GatewayDbModel, number: &PhoneNumber)
    -> Result<()>;

    /// Capture what the provider app shows (a PNG screenshot).
    async fn capture_evidence(&self, gateway: &GatewayDbModel) -> Result<Vec<u8>>;

    async fn end_call(&self, gateway: &GatewayDbModel, number: &PhoneNumber) -> Result<()>;

    /// Current connectivity, `Offline` when the device cannot be reached.
    async fn probe_status(&self, gateway: &GatewayDbModel) -> GatewayStatus;
}

/// Turns captured evidence into text for keyword matching.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, evidence: &[u8]) -> Result<String>;
}
