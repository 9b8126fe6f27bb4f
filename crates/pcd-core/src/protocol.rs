//! Protocol constants for the PCD400 USB command channel.

// Result codes returned by every operation.
pub const PCDUSB_ERROR_NONE: i32 = 0;
pub const PCDUSB_ERROR_NOT_OPEN: i32 = -1;
pub const PCDUSB_ERROR_PARAM: i32 = -2;
pub const PCDUSB_ERROR_LOCKED: i32 = -3;
pub const PCDUSB_ERROR_NO_TARGET: i32 = -100;
pub const PCDUSB_ERROR_TRANS: i32 = -101;
pub const PCDUSB_ERROR_EXCEPTION: i32 = -102;

// Communication timeout bounds, in seconds.
pub const PCDUSB_TMO_MIN: u32 = 1;
pub const PCDUSB_TMO_MAX: u32 = 60;
pub const PCDUSB_TMO_DEFAULT: u32 = 5;

// Values written by the presence check.
pub const PCDUSB_CONNECTED: u16 = 1;
pub const PCDUSB_NOT_CONNECTED: u16 = 0;

/// Vendor id matched when no configuration is supplied.
///
/// The device header does not publish the USB ids of the hardware, so the
/// installed unit's ids belong in the config file.
pub const DEFAULT_VENDOR_ID: u16 = 0x0000;
/// Product id matched when no configuration is supplied.
pub const DEFAULT_PRODUCT_ID: u16 = 0x0000;
/// Interface carrying the bulk command endpoints.
pub const DEFAULT_INTERFACE: u8 = 0;

/// Vendor control request that asks the target to reset itself.
pub const VENDOR_REQUEST_TARGET_RESET: u8 = 0x01;

/// Bytes of each transfer copied into packet events.
pub const PACKET_PREVIEW_LEN: usize = 32;

/// Name of the cross-process lock file created in the temp directory.
pub const LOCK_FILE_NAME: &str = "pcd400-usb.lock";
