//! snipocr core library
//!
//! Region selection, debounced auto-run scheduling and the host-facing
//! session that ties selection, preprocessing and recognition together.

pub mod config;
pub mod logging;
pub mod message;
pub mod runner;
pub mod scheduler;
pub mod selection;
pub mod session;

pub use config::{AppConfig, BackendKind};
pub use message::{CoreEvent, HostCommand};
pub use runner::SessionRunner;
pub use scheduler::{AutoRunScheduler, Clock, TokioClock, DEFAULT_QUIET_PERIOD};
pub use selection::{Release, Selection, SelectionController, Surface};
pub use session::{Job, Session, SessionSettings, SessionState, StateKind};
