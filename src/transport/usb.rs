//! USB Transportation.
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};

use super::Transport;
use crate::constants::MAX_PACKET_SIZE;
use crate::error::{Result, TransportError};

const ISP_VID: u16 = 0x4348;
const ISP_PID: u16 = 0x55e0;

const ENDPOINT_OUT: u8 = 0x02;
const ENDPOINT_IN: u8 = 0x82;

const INTERFACE: u8 = 0;

const TIMEOUT_MS: u64 = 10_000;

pub struct UsbTransport {
    device_handle: DeviceHandle<Context>,
    /// Kernel driver was detached on open and must be given back on close
    reattach_kernel_driver: bool,
}

fn is_isp_device(device: &Device<Context>) -> bool {
    device
        .device_descriptor()
        .map(|desc| desc.vendor_id() == ISP_VID && desc.product_id() == ISP_PID)
        .unwrap_or(false)
}

impl UsbTransport {
    /// Open and claim every attached ISP device, in bus enumeration order.
    pub fn open_all() -> Result<Vec<UsbTransport>> {
        let context = Context::new()?;

        context
            .devices()?
            .iter()
            .filter(is_isp_device)
            .map(Self::open)
            .collect()
    }

    fn open(device: Device<Context>) -> Result<UsbTransport> {
        log::debug!("Opening USB Device {:?}", device);

        let config = device.config_descriptor(0)?;

        let mut endpoint_out_found = false;
        let mut endpoint_in_found = false;
        if let Some(intf) = config.interfaces().next() {
            if let Some(desc) = intf.descriptors().next() {
                for endpoint in desc.endpoint_descriptors() {
                    if endpoint.address() == ENDPOINT_OUT {
                        endpoint_out_found = true;
                    }
                    if endpoint.address() == ENDPOINT_IN {
                        endpoint_in_found = true;
                    }
                }
            }
        }

        if !(endpoint_out_found && endpoint_in_found) {
            return Err(TransportError::EndpointsNotFound.into());
        }

        let mut device_handle = device.open()?;

        let kernel_active = match device_handle.kernel_driver_active(INTERFACE) {
            Ok(active) => active,
            Err(rusb::Error::NotSupported) => false,
            Err(e) => return Err(e.into()),
        };
        if kernel_active {
            log::debug!("Detaching kernel driver");
            device_handle.detach_kernel_driver(INTERFACE)?;
        }

        device_handle.claim_interface(INTERFACE)?;

        Ok(UsbTransport {
            device_handle,
            reattach_kernel_driver: kernel_active,
        })
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.device_handle.release_interface(INTERFACE) {
            log::warn!("release_interface: {}", e);
        }
        if self.reattach_kernel_driver {
            if let Err(e) = self.device_handle.attach_kernel_driver(INTERFACE) {
                log::warn!("attach_kernel_driver: {}", e);
            }
        }
    }
}

impl Transport for UsbTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<usize> {
        let n = self
            .device_handle
            .write_bulk(ENDPOINT_OUT, raw, Duration::from_millis(TIMEOUT_MS))?;
        Ok(n)
    }

    fn recv_raw(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let nread =
            self.device_handle
                .read_bulk(ENDPOINT_IN, &mut buf, Duration::from_millis(TIMEOUT_MS))?;
        Ok(buf[..nread].to_vec())
    }
}
