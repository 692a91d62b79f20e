//! Board wiring for the cycle monitor.
//!
//! | Signal        | Pin | Electrical                      |
//! |---------------|-----|---------------------------------|
//! | machine sensor| PA4 | input, pull-up, active low      |
//! | pause switch  | PA5 | input, pull-up, active low      |
//! | red lamp      | PA2 | push-pull output, active high   |
//! | green lamp    | PA3 | push-pull output, active high   |
//! | buzzer        | PA6 | push-pull output, active high   |

use cycle_core::cycle::{Buzzer, Indicator, IndicatorColor, MachineInputs};
use embassy_stm32::gpio::{Input, Output};

pub struct PanelInputs<'d> {
    sensor: Input<'d>,
    pause: Input<'d>,
}

impl<'d> PanelInputs<'d> {
    pub fn new(sensor: Input<'d>, pause: Input<'d>) -> Self {
        Self { sensor, pause }
    }
}

impl MachineInputs for PanelInputs<'_> {
    fn sensor_active(&mut self) -> bool {
        self.sensor.is_low()
    }

    fn pause_requested(&mut self) -> bool {
        self.pause.is_low()
    }
}

pub struct StackLight<'d> {
    red: Output<'d>,
    green: Output<'d>,
}

impl<'d> StackLight<'d> {
    pub fn new(red: Output<'d>, green: Output<'d>) -> Self {
        Self { red, green }
    }
}

impl Indicator for StackLight<'_> {
    fn show(&mut self, color: IndicatorColor) {
        match color {
            IndicatorColor::Stopped => {
                self.green.set_low();
                self.red.set_high();
            }
            IndicatorColor::Running => {
                self.red.set_low();
                self.green.set_high();
            }
        }
    }
}

pub struct PiezoBuzzer<'d> {
    output: Output<'d>,
}

impl<'d> PiezoBuzzer<'d> {
    pub fn new(output: Output<'d>) -> Self {
        Self { output }
    }
}

impl Buzzer for PiezoBuzzer<'_> {
    fn set_active(&mut self, active: bool) {
        if active {
            self.output.set_high();
        } else {
            self.output.set_low();
        }
    }
}
