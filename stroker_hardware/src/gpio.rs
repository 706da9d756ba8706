//! Raspberry Pi inputs via `rppal`.

use rppal::gpio::{Gpio, InputPin};
use stroker_traits::{BoxError, ButtonInput, HomeSensor};

use crate::error::{HwError, Result};

fn input_pin(pin: u8) -> Result<InputPin> {
    let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
    let pin = gpio.get(pin).map_err(|e| HwError::Gpio(e.to_string()))?;
    Ok(pin.into_input_pullup())
}

/// Push button wired to ground with the internal pull-up.
pub struct GpioButton {
    pin: InputPin,
    active_low: bool,
}

impl GpioButton {
    pub fn new(pin: u8, active_low: bool) -> Result<Self> {
        Ok(Self {
            pin: input_pin(pin)?,
            active_low,
        })
    }
}

impl ButtonInput for GpioButton {
    fn is_pressed(&mut self) -> std::result::Result<bool, BoxError> {
        Ok(self.pin.is_low() == self.active_low)
    }
}

/// Limit switch at the home end of the rail.
pub struct GpioHomeSwitch {
    pin: InputPin,
    active_low: bool,
}

impl GpioHomeSwitch {
    pub fn new(pin: u8, active_low: bool) -> Result<Self> {
        Ok(Self {
            pin: input_pin(pin)?,
            active_low,
        })
    }
}

impl HomeSensor for GpioHomeSwitch {
    fn is_triggered(&mut self) -> std::result::Result<bool, BoxError> {
        Ok(self.pin.is_low() == self.active_low)
    }
}
