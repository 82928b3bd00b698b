pub mod press;
pub mod swipe;

pub use press::PressDevice;
pub use swipe::SwipeDevice;
