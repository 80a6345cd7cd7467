//! OS interrupt adapter: SIGINT and SIGTERM request a scheduler stop, so
//! the run loop returns and the caller's close path runs.

use log::info;

use crate::scheduler::StopHandle;

/// Route SIGINT/SIGTERM to `stop`.  Only one handler may be installed per
/// process.
pub fn stop_on_interrupt(stop: StopHandle) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Interrupt received, stopping");
        stop.request();
    })
}
