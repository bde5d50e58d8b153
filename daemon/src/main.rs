use ::anyhow::{Context, Result};
use ::argh::FromArgs;
use ::log::{info, warn};
use ::std::path::{Path, PathBuf};
use ::std::sync::atomic::{AtomicBool, Ordering};
use ::std::sync::Arc;

mod codes;
mod ctlr_detector;
mod ctlr_mgr;
mod evdev;
mod event_loop;
mod phys_ctlr;
mod relay;
mod uinput;
mod virt_ctlr;
mod virt_ctlr_combined;
mod virt_ctlr_passthrough;
mod virt_ctlr_pro;
mod virt_mouse;

/// Nintendo Switch controller manager
#[derive(FromArgs, PartialEq, Debug)]
struct JoycondOpts {
    #[argh(
        option,
        short = 'c',
        default = "Path::new(\"/etc/joycond.toml\").into()"
    )]
    /// path to your configuration file. (default: /etc/joycond.toml)
    config: PathBuf,
}

static READY: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_shutdown(_: ::libc::c_int) {
    READY.store(false, Ordering::Relaxed);
}

fn install_signal_handlers() -> Result<()> {
    use ::nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

fn load_settings(path: &Path) -> Result<::config::Settings> {
    match ::std::fs::read_to_string(path) {
        Ok(text) => {
            ::toml::from_str(&text).with_context(|| format!("bad config file {}", path.display()))
        }
        Err(ref e) if e.kind() == ::std::io::ErrorKind::NotFound => {
            info!("no config file at {}, using defaults", path.display());
            Ok(::config::Settings::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn main() -> Result<()> {
    ::env_logger::init();
    let opts: JoycondOpts = ::argh::from_env();
    let settings = load_settings(&opts.config)?;

    let layout = match ::config::load_or_init_layout(&settings.layout_dir) {
        Ok(layout) => layout,
        Err(e) => {
            warn!("could not load layout file: {}; using default layout", e);
            ::config::default_layout()
        }
    };
    let mapping = Arc::new(::config::Mapping::new(&settings, layout));
    let tuning = ::config::MouseTuning::from(&settings);

    install_signal_handlers()?;

    let mut event_loop = event_loop::EventLoop::new();
    let mut mgr = ctlr_mgr::CtlrMgr::new(mapping, tuning);
    let mut detector = ctlr_detector::CtlrDetector::new(&mut event_loop, &mut mgr)?;
    info!("joycond is up");

    while READY.load(Ordering::Relaxed) {
        for fd in event_loop.wait() {
            // an earlier callback in this batch may have deregistered it
            if !event_loop.contains(fd) {
                continue;
            }
            if fd == detector.uevent_fd() {
                detector.handle_events(&mut event_loop, &mut mgr)?;
            } else {
                mgr.handle_fd(&mut event_loop, fd)?;
            }
        }
    }

    info!("joycond shutting down");
    Ok(())
}
