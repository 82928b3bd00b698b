use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use clap::{Parser, ValueEnum};

use fpcore_usb::error::FpError;
use fpcore_usb::host::{HostCallbacks, ImgDevState};
use fpcore_usb::image::Image;
use fpcore_usb::profile;
use fpcore_usb::usb::UsbContext;
use fpcore_usb::FpDevice;

/// Manual exerciser for a connected fingerprint sensor: opens the first matching device, activates it, and prints
/// `finger_status`/`image_captured` events to stdout until interrupted.
#[derive(Debug, Parser)]
#[command(name = "fpdump")]
#[command(about = "Stream finger_status/image_captured events from a USB fingerprint sensor")]
struct Args {
    /// Restrict to a named profile (e.g. "upeksonly", "uru4000",
    /// "uru4000-auth"); probes every known device id if omitted.
    #[arg(short = 'p', long)]
    profile: Option<String>,

    /// Sub-state requested once activation completes.
    #[arg(short = 's', long, value_enum, default_value_t = ActivationState::Capture)]
    state: ActivationState,

    /// Directory captured images are written to as PGM files.
    #[arg(short = 'o', long, default_value = ".")]
    out_dir: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActivationState {
    AwaitFingerOn,
    Capture,
    AwaitFingerOff,
}

impl From<ActivationState> for ImgDevState {
    fn from(state: ActivationState) -> Self {
        match state {
            ActivationState::AwaitFingerOn => ImgDevState::AwaitFingerOn,
            ActivationState::Capture => ImgDevState::Capture,
            ActivationState::AwaitFingerOff => ImgDevState::AwaitFingerOff,
        }
    }
}

/// Prints every host-contract event to stdout/stderr and dumps each
/// captured image to a `.pgm` file for manual inspection.
struct Dumper {
    out_dir: String,
    image_count: u32,
}

impl Dumper {
    fn new(out_dir: String) -> Self {
        Dumper {
            out_dir,
            image_count: 0,
        }
    }
}

impl HostCallbacks for Dumper {
    fn open_complete(&mut self, result: Result<(), i32>) {
        match result {
            Ok(()) => log::info!("open complete"),
            Err(errno) => log::error!("open failed: errno {errno}"),
        }
    }

    fn close_complete(&mut self) {
        log::info!("close complete");
    }

    fn activate_complete(&mut self, result: Result<(), i32>) {
        match result {
            Ok(()) => println!("activated"),
            Err(errno) => {
                eprintln!("activate failed: errno {errno}");
                std::process::exit(1);
            }
        }
    }

    fn deactivate_complete(&mut self) {
        println!("deactivated");
    }

    fn image_captured(&mut self, image: Image) {
        self.image_count += 1;
        let path = format!("{}/capture-{:04}.pgm", self.out_dir, self.image_count);
        match write_pgm(&path, &image) {
            Ok(()) => println!("wrote {path} ({}x{})", image.width(), image.height()),
            Err(e) => eprintln!("failed to write {path}: {e}"),
        }
    }

    fn report_finger_status(&mut self, present: bool) {
        println!("finger_status: {}", if present { "on" } else { "off" });
    }

    fn session_error(&mut self, err: i32) {
        eprintln!("session_error: errno {err}");
    }
}

fn write_pgm(path: &str, image: &Image) -> std::io::Result<()> {
    let mut f = std::fs::File::create(path)?;
    write!(f, "P5\n{} {}\n255\n", image.width(), image.height())?;
    f.write_all(image.data())?;
    Ok(())
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, run(args))
}

async fn run(args: Args) -> std::io::Result<()> {
    let context = UsbContext::new()
        .map_err(|e| std::io::Error::other(format!("failed to init libusb: {e}")))?;

    let candidates = match &args.profile {
        Some(name) => profile::ids_named(name),
        None => profile::all_ids(),
    };
    if candidates.is_empty() {
        eprintln!("no profile named {:?}", args.profile);
        std::process::exit(1);
    }

    let host: Rc<RefCell<dyn HostCallbacks>> =
        Rc::new(RefCell::new(Dumper::new(args.out_dir.clone())));

    let mut device = None;
    for (vendor, product, _profile) in &candidates {
        match FpDevice::open(&context, *vendor, *product, host.clone()) {
            Ok(d) => {
                println!("opened {vendor:04x}:{product:04x}");
                device = Some(d);
                break;
            }
            Err(FpError::NoDev) => continue,
            Err(e) => {
                eprintln!("open failed: {e}");
                std::process::exit(1);
            }
        }
    }
    let mut device = match device {
        Some(d) => d,
        None => {
            eprintln!("no matching sensor found on the bus");
            std::process::exit(1);
        }
    };

    device.activate(args.state.into()).await;
    println!("press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    device.deactivate().await;
    device.close();
    Ok(())
}
