pub mod activation;
pub mod aes;
pub mod constants;
pub mod device;
pub mod fwfixer;
pub mod imaging;

pub use device::PressDevice;
