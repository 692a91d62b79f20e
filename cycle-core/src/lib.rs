#![no_std]

// Shared logic for the machine-cycle monitor.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Inputs, lamps, the buzzer, the radio and the clock are
// all reached through traits so the same state machines run on the STM32 and
// inside the host emulator.

pub mod cycle;
pub mod network;
pub mod telemetry;
pub mod timing;
