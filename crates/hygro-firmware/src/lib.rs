#![no_std]

extern crate alloc;

pub mod clock;
pub mod hardware;
pub mod mqtt;
pub mod secrets;
pub mod sensor;
pub mod storage;
pub mod wifi;
