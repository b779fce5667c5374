//! Domain layer: records, their state-transition rules, and the ports the
//! application layer depends on.

pub mod appointment;
pub mod gateway;
pub mod medical_record;
pub mod money;
pub mod payment;
pub mod ports;
pub mod service;
pub mod slot;
