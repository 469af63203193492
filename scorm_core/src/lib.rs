// scorm_core: SCORM runtime bridge and content player for the learning app.
// The LMS API object, the player state machine, progress observation and
// reward arbitration all live here; JS renders the frame and performs HTTP.

mod arbiter;
mod client;
mod cmi;
mod config;
mod error;
mod frame;
mod logging;
mod observer;
mod player;
mod runtime;
mod scorm_error;
mod session;
mod types;
mod wasm;

use wasm_bindgen::prelude::*;

pub use arbiter::{RewardArbiter, RewardOutcome, WatchLatch};
pub use client::{ClientSink, PersistenceClient, ProgressSink, SaveAck, SaveLedger, Spawner};
pub use cmi::CmiTimespan;
pub use config::{CompletionPolicy, PlayerConfig};
pub use error::{ClientError, PlayerError, SessionError};
pub use frame::{origin_of, ApiHandle, ApiHost, GLOBAL_NAMES, SCORM_12_GLOBAL, SCORM_2004_GLOBAL};
pub use logging::init_logging;
pub use observer::{MessageObserver, ObserverMode, PollingObserver, ProgressObserver, ProgressSample};
pub use player::{Clock, Player};
pub use runtime::LmsRuntime;
pub use scorm_error::ScormError;
pub use session::{
    CloseDecision, Followup, Phase, PlayerSession, ProgressMirror, SessionEvent, SessionTicket,
    ViewingStatus, WatchRequest,
};
pub use types::*;
pub use wasm::{IframeHost, JsPersistenceClient, WasmPlayer, WasmScormApi};

/// Install the panic hook for readable errors in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Configure log output (`trace` .. `error`). The first call wins.
#[wasm_bindgen(js_name = initLogging)]
pub fn init_logging_js(level: &str) {
    init_logging(level);
}
