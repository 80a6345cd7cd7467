//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements    | Connects to                      |
//! |--------------|---------------|----------------------------------|
//! | `hardware`   | HardwarePort  | embedded-hal pins, PWM, delay    |
//! | `log_sink`   | EventSink     | `log` facade                     |
//! | `remote_log` | RemoteSync    | JSON documents on the log        |
//! | `signal`     | StopHandle    | SIGINT / SIGTERM                 |
//! | `sim`        | embedded-hal  | host rotor model                 |
//! | `time`       | Clock         | host wall clock / manual clock   |

pub mod hardware;
pub mod log_sink;
pub mod remote_log;
pub mod signal;
pub mod sim;
pub mod time;
