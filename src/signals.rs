//! SIGHUP listener: translates the signal into a `Reload` action submitted
//! to the dispatcher, matching the source's `listenSIGHUP`.

use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};

use crate::dispatcher::{Action, Dispatcher};

pub fn spawn(dispatcher: Dispatcher, config_path: String) {
    let mut signals = match Signals::new([SIGHUP]) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };

    std::thread::Builder::new()
        .name("sighup-listener".into())
        .spawn(move || {
            for signal in signals.forever() {
                if signal == SIGHUP {
                    info!("SIGHUP received, reloading configuration");
                    if let Err(e) = dispatcher.submit(Action::Reload(config_path.clone())) {
                        warn!(error = %e, "reload triggered by SIGHUP failed");
                    }
                }
            }
        })
        .expect("spawn SIGHUP listener thread");
}
