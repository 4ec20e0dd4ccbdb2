//! Raspberry Pi GPIO gateway (BCM numbering)

use anyhow::{Context, Result};
use doco_core::{DigitalIo, DoorConfig, GpioError, Level};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Pins claimed for every enabled door. Outputs start released (high).
pub struct RpiIo {
    inputs: HashMap<u8, Mutex<InputPin>>,
    outputs: HashMap<u8, Mutex<OutputPin>>,
}

impl RpiIo {
    pub fn new(doors: &[DoorConfig]) -> Result<Self> {
        let gpio = Gpio::new().context("Failed to open GPIO")?;
        let mut inputs = HashMap::new();
        let mut outputs = HashMap::new();

        for door in doors.iter().filter(|d| d.enabled) {
            for pin in door.output_pins() {
                let output = gpio
                    .get(pin)
                    .with_context(|| format!("Door {}: cannot claim output pin {}", door.id, pin))?
                    .into_output_high();
                outputs.insert(pin, Mutex::new(output));
            }
            for pin in door.input_pins() {
                let input = gpio
                    .get(pin)
                    .with_context(|| format!("Door {}: cannot claim input pin {}", door.id, pin))?
                    .into_input();
                inputs.insert(pin, Mutex::new(input));
            }
        }

        info!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            "GPIO initialized"
        );
        Ok(Self { inputs, outputs })
    }
}

impl DigitalIo for RpiIo {
    fn read(&self, pin: u8) -> Result<bool, GpioError> {
        let input = self.inputs.get(&pin).ok_or(GpioError::UnknownPin(pin))?;
        let input = input.lock().map_err(|_| poisoned(pin))?;
        Ok(input.is_high())
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let output = self.outputs.get(&pin).ok_or(GpioError::UnknownPin(pin))?;
        let mut output = output.lock().map_err(|_| poisoned(pin))?;
        match level {
            Level::Low => output.set_low(),
            Level::High => output.set_high(),
        }
        Ok(())
    }
}

fn poisoned(pin: u8) -> GpioError {
    GpioError::Access {
        pin,
        reason: "pin lock poisoned".to_string(),
    }
}
