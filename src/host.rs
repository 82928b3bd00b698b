use crate::image::Image;

/// Requested activation sub-state, passed into [`crate::facade::activate`]
/// and honored only once the activation engine's `init` SSM has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImgDevState {
    AwaitFingerOn,
    Capture,
    AwaitFingerOff,
}

/// The host-library contract a driver reports back through. A real libfprint-alike host would
/// implement this to bridge into its own async runtime / D-Bus surface;
/// here it is a plain callback sink invoked directly from the reactor,
/// matching the single-threaded cooperative dispatch model the rest of this
/// crate assumes.
pub trait HostCallbacks {
    fn open_complete(&mut self, result: Result<(), i32>);
    fn close_complete(&mut self);
    fn activate_complete(&mut self, result: Result<(), i32>);
    fn deactivate_complete(&mut self);
    fn image_captured(&mut self, image: Image);
    fn report_finger_status(&mut self, present: bool);
    fn session_error(&mut self, err: i32);
}
