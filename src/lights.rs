/*
 * @file lights.rs
 * @brief Red/blue indicator state tracking and GPIO line control
 * @author Kevin Thomas
 * @date 2025
 *
 * MIT License
 *
 * Copyright (c) 2025 Kevin Thomas
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! Indicator light control: two binary outputs with in-memory state.
//!
//! The red and blue lights each track an ON/OFF flag in memory and drive a
//! physical output line through a [`LineDriver`]. The lines are write-only;
//! the in-memory flag is the source of truth for status queries.

use anyhow::Result;
use tracing::{debug, info, warn};

/// Consumer label attached to requested GPIO lines.
const LINE_CONSUMER: &str = "ledi";

/// Confirmation returned when a light is asked on while already on.
pub const ALREADY_ON: &str = "The light is already on.";

/// Confirmation returned when a light transitions from off to on.
pub const TURNED_ON: &str = "I've turned the light on. The room is lit now.";

/// Confirmation returned when a light is asked off while already off.
pub const ALREADY_OFF: &str = "The light is already off.";

/// Confirmation returned when a light transitions from on to off.
pub const TURNED_OFF: &str = "I've turned the light off. The room is dark now.";

/// One of the two controllable indicator lights.
///
/// # Details
/// The set of lights is fixed and closed, so an invalid identifier is
/// unrepresentable rather than a runtime error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Light {
    Red,
    Blue,
}

impl Light {
    /// Returns the lowercase color word used in user-facing sentences.
    pub fn color_word(self) -> &'static str {
        match self {
            Light::Red => "red",
            Light::Blue => "blue",
        }
    }
}

/// Sink for physical line writes.
///
/// # Details
/// Implementations map a light plus a logic level onto whatever transport
/// reaches the hardware. The [`LightBank`] only calls `drive` when a light
/// actually changes state, so repeated identical requests never touch the
/// line twice.
pub trait LineDriver: Send {
    /// Drives the output line for `light` to the given logic level.
    ///
    /// # Arguments
    /// * `light` - Which output line to write.
    /// * `high` - `true` for logic 1, `false` for logic 0.
    ///
    /// # Errors
    /// Returns an error if the underlying transport rejects the write.
    fn drive(&mut self, light: Light, high: bool) -> Result<()>;
}

/// In-memory state for both lights plus the driver that reaches the hardware.
///
/// # Details
/// Both lights start OFF. State transitions are idempotent: setting a light
/// to the state it is already in returns the matching "already" confirmation
/// without driving the line.
pub struct LightBank {
    red_on: bool,
    blue_on: bool,
    driver: Box<dyn LineDriver>,
}

impl LightBank {
    /// Creates a bank with both lights OFF.
    pub fn new(driver: Box<dyn LineDriver>) -> Self {
        Self {
            red_on: false,
            blue_on: false,
            driver,
        }
    }

    /// Sets one light to the desired state.
    ///
    /// # Details
    /// When the light is already in the desired state this is a no-op that
    /// still returns the matching confirmation. Otherwise the in-memory flag
    /// flips and the line is driven exactly once.
    ///
    /// # Arguments
    /// * `light` - The light to mutate.
    /// * `desired_on` - Target state.
    ///
    /// # Returns
    /// The user-facing confirmation sentence for what happened.
    ///
    /// # Errors
    /// Returns an error if the line driver rejects the write.
    pub fn set_state(&mut self, light: Light, desired_on: bool) -> Result<&'static str> {
        if self.is_on(light) == desired_on {
            debug!(
                "{} light already {}",
                light.color_word(),
                level_word(desired_on)
            );
            return Ok(if desired_on { ALREADY_ON } else { ALREADY_OFF });
        }
        *self.cell_mut(light) = desired_on;
        self.driver.drive(light, desired_on)?;
        info!("{} LED {}", light.color_word(), level_word(desired_on));
        Ok(if desired_on { TURNED_ON } else { TURNED_OFF })
    }

    /// Reports one light's state as the word used in status sentences.
    ///
    /// # Returns
    /// * `"on"` or `"off"`.
    pub fn query_state(&self, light: Light) -> &'static str {
        level_word(self.is_on(light))
    }

    /// Composes the one-sentence status report naming both lights.
    pub fn status_sentence(&self) -> String {
        format!(
            "Right now the red light is {}, the blue light is {}.",
            self.query_state(Light::Red),
            self.query_state(Light::Blue)
        )
    }

    fn is_on(&self, light: Light) -> bool {
        match light {
            Light::Red => self.red_on,
            Light::Blue => self.blue_on,
        }
    }

    fn cell_mut(&mut self, light: Light) -> &mut bool {
        match light {
            Light::Red => &mut self.red_on,
            Light::Blue => &mut self.blue_on,
        }
    }
}

/// Maps a boolean level onto the status word.
fn level_word(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Opens the best available line driver for this machine.
///
/// # Details
/// On Linux this requests the two output lines on the configured GPIO chip,
/// both initially low. When the chip cannot be opened (no such device,
/// missing permissions) or on non-Linux platforms, a simulated driver that
/// only logs writes is returned so the assistant still runs on a development
/// machine.
///
/// # Arguments
/// * `chip` - GPIO chip name, e.g. `"gpiochip4"`.
/// * `red_offset` - Line offset wired to the red LED.
/// * `blue_offset` - Line offset wired to the blue LED.
pub fn open_driver(chip: &str, red_offset: u32, blue_offset: u32) -> Box<dyn LineDriver> {
    #[cfg(target_os = "linux")]
    match GpioLineDriver::open(chip, red_offset, blue_offset) {
        Ok(driver) => {
            info!(
                "GPIO lines ready on {} (red={}, blue={})",
                chip, red_offset, blue_offset
            );
            return Box::new(driver);
        }
        Err(err) => {
            warn!("GPIO chip {} unavailable: {:#}", chip, err);
            warn!("Falling back to simulated output lines");
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (chip, red_offset, blue_offset);
        warn!("GPIO lines are only supported on Linux; using simulated output lines");
    }
    Box::new(SimulatedLineDriver)
}

/// Line driver backed by the Linux GPIO character device.
///
/// # Details
/// Each light gets its own requested output line, both driven low at
/// startup so the process always begins from a known hardware state.
#[cfg(target_os = "linux")]
pub struct GpioLineDriver {
    red: gpiod::Lines<gpiod::Output>,
    blue: gpiod::Lines<gpiod::Output>,
}

#[cfg(target_os = "linux")]
impl GpioLineDriver {
    /// Requests both output lines on the given chip.
    ///
    /// # Errors
    /// Returns an error if the chip cannot be opened or either line request
    /// is rejected (already claimed, bad offset, missing permissions).
    pub fn open(chip: &str, red_offset: u32, blue_offset: u32) -> Result<Self> {
        use anyhow::Context;

        let chip_handle = gpiod::Chip::new(chip)
            .with_context(|| format!("Failed to open GPIO chip {chip}"))?;
        let red = Self::request_output(&chip_handle, red_offset)?;
        let blue = Self::request_output(&chip_handle, blue_offset)?;
        Ok(Self { red, blue })
    }

    fn request_output(chip: &gpiod::Chip, offset: u32) -> Result<gpiod::Lines<gpiod::Output>> {
        use anyhow::Context;

        let options = gpiod::Options::output([offset])
            .values([false])
            .consumer(LINE_CONSUMER);
        chip.request_lines(options)
            .with_context(|| format!("Failed to request output line {offset}"))
    }
}

#[cfg(target_os = "linux")]
impl LineDriver for GpioLineDriver {
    fn drive(&mut self, light: Light, high: bool) -> Result<()> {
        use anyhow::Context;

        let line = match light {
            Light::Red => &self.red,
            Light::Blue => &self.blue,
        };
        line.set_values([high])
            .with_context(|| format!("Failed to drive the {} line", light.color_word()))
    }
}

/// Driver used when no GPIO hardware is reachable; writes are only logged.
#[derive(Debug, Default)]
pub struct SimulatedLineDriver;

impl LineDriver for SimulatedLineDriver {
    fn drive(&mut self, light: Light, high: bool) -> Result<()> {
        debug!(
            "simulated {} line set {}",
            light.color_word(),
            if high { "high" } else { "low" }
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared log of every physical write a [`RecordingDriver`] performed.
    pub(crate) type WriteLog = Arc<Mutex<Vec<(Light, bool)>>>;

    /// Line driver that records writes for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingDriver {
        writes: WriteLog,
    }

    impl RecordingDriver {
        /// Creates a driver plus a handle to its write log.
        pub(crate) fn new() -> (Self, WriteLog) {
            let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    writes: writes.clone(),
                },
                writes,
            )
        }
    }

    impl LineDriver for RecordingDriver {
        fn drive(&mut self, light: Light, high: bool) -> Result<()> {
            self.writes.lock().unwrap().push((light, high));
            Ok(())
        }
    }

    /// Builds a bank on a recording driver, returning both.
    pub(crate) fn recording_bank() -> (LightBank, WriteLog) {
        let (driver, writes) = RecordingDriver::new();
        (LightBank::new(Box::new(driver)), writes)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::recording_bank;
    use super::*;

    #[test]
    fn set_state_is_idempotent_and_drives_line_once() {
        let (mut bank, writes) = recording_bank();

        assert_eq!(bank.set_state(Light::Red, true).unwrap(), TURNED_ON);
        assert_eq!(bank.set_state(Light::Red, true).unwrap(), ALREADY_ON);
        assert_eq!(bank.query_state(Light::Red), "on");
        assert_eq!(*writes.lock().unwrap(), vec![(Light::Red, true)]);
    }

    #[test]
    fn turning_off_an_off_light_is_a_no_op() {
        let (mut bank, writes) = recording_bank();

        assert_eq!(bank.set_state(Light::Blue, false).unwrap(), ALREADY_OFF);
        assert_eq!(bank.query_state(Light::Blue), "off");
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn lights_are_independent() {
        let (mut bank, _writes) = recording_bank();

        bank.set_state(Light::Red, true).unwrap();
        assert_eq!(bank.query_state(Light::Red), "on");
        assert_eq!(bank.query_state(Light::Blue), "off");

        bank.set_state(Light::Blue, true).unwrap();
        assert_eq!(bank.set_state(Light::Red, false).unwrap(), TURNED_OFF);
        assert_eq!(bank.query_state(Light::Blue), "on");
        assert_eq!(bank.query_state(Light::Red), "off");
    }

    #[test]
    fn status_sentence_names_both_lights() {
        let (mut bank, _writes) = recording_bank();
        bank.set_state(Light::Red, true).unwrap();

        let sentence = bank.status_sentence();
        assert!(sentence.contains("red light is on"));
        assert!(sentence.contains("blue light is off"));
    }

    #[test]
    fn simulated_driver_accepts_writes() {
        let mut driver = SimulatedLineDriver;
        assert!(driver.drive(Light::Red, true).is_ok());
        assert!(driver.drive(Light::Blue, false).is_ok());
    }
}
