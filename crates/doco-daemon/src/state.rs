//! Application state management

use doco_core::{CalibrationStore, CommandIntake, DigitalIo, StateCache};
use std::sync::Arc;

use crate::auth::TokenGuard;
use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Configuration, validated at load
    pub config: Config,
    /// Per-door runtime records
    pub cache: Arc<StateCache>,
    /// Single entry point for commands from the bus and the HTTP API
    pub intake: Arc<CommandIntake>,
    /// GPIO gateway (hardware or simulated)
    pub io: Arc<dyn DigitalIo>,
    /// Travel times, fixed once startup calibration is done
    pub calibration: CalibrationStore,
    /// Secret for the legacy HTTP API
    pub token: TokenGuard,
}

impl AppState {
    pub fn new(
        config: Config,
        io: Arc<dyn DigitalIo>,
        calibration: CalibrationStore,
        token: TokenGuard,
    ) -> Arc<Self> {
        let cache = Arc::new(StateCache::new(config.doors.iter().map(|d| d.id.clone())));
        let intake = Arc::new(CommandIntake::new(
            &config.doors,
            io.clone(),
            cache.clone(),
            config.daemon.pulse(),
        ));

        Arc::new(Self {
            config,
            cache,
            intake,
            io,
            calibration,
            token,
        })
    }
}
