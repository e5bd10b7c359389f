//! Simulated device-side handlers

use std::thread;
use std::time::Duration;

use dm_client::{
    ActionCommand, ActionStatus, FirmwareCommand, FirmwareHandler, FirmwareUpdateStatus,
    HandlerError, DeviceActionHandler,
};
use tracing::info;

/// Pretends to fetch and flash firmware images
pub struct SimulatedFlasher {
    pub work: Duration,
    pub fail_download: bool,
}

impl FirmwareHandler for SimulatedFlasher {
    fn download(&self, command: &mut FirmwareCommand) -> Result<(), HandlerError> {
        let url = command.url.as_deref().unwrap_or_default();
        info!("Downloading firmware from {}", url);
        thread::sleep(self.work);
        if self.fail_download {
            return Err(HandlerError::with_status(
                FirmwareUpdateStatus::ConnectionLost,
                format!("simulated network failure fetching {}", url),
            ));
        }
        info!("Downloaded firmware {}", command.version.as_deref().unwrap_or("(unversioned)"));
        Ok(())
    }

    fn update(&self, command: &mut FirmwareCommand) -> Result<(), HandlerError> {
        info!("Installing firmware {}", command.version.as_deref().unwrap_or("(unversioned)"));
        thread::sleep(self.work);
        command.set_update_status(FirmwareUpdateStatus::Success);
        Ok(())
    }
}

/// Accepts reboots and declines factory resets
pub struct SimulatedRebooter;

impl DeviceActionHandler for SimulatedRebooter {
    fn reboot(&self, action: &mut ActionCommand) {
        info!("Reboot requested; scheduling");
        action.set_status(ActionStatus::Accepted);
    }

    fn factory_reset(&self, action: &mut ActionCommand) {
        action.set_status(ActionStatus::NotSupported);
        action.set_message("factory reset is disabled in the simulator");
    }
}
