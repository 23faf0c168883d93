//! Hardware-independent core library for the Smart Liner vibration tag
//!
//! This crate contains the platform-agnostic logic of the tag firmware: the
//! cooperative task scheduler, the flash-backed session store, the vibration
//! FFT pipeline, the device configuration and the task bodies that tie them
//! to the board collaborators (IMU, resonant antenna, radio, watchdog).
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both the
//! embedded target and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod commands;
pub mod config;
pub mod fft;
pub mod radio;
pub mod scheduler;
pub mod sensors;
pub mod storage;
pub mod tasks;
