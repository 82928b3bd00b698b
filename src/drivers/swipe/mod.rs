pub mod activation;
pub mod capture;
pub mod constants;
pub mod device;

pub use device::SwipeDevice;
