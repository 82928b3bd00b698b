pub mod context;
pub mod device;
pub mod transfer;

pub use context::{UsbContext, UsbDeviceHandle};
pub use device::{open_matching, InterfaceInfo};
pub use transfer::{control_in, control_out, read, write, TransferHandle};
