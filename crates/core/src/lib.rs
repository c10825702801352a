#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! The event bus and external-collaborator trait surface shared by the
//! orchestration engine, the device registry, and the planning agent.

pub mod device;
pub mod event_bus;
pub mod oracle;

pub use device::DeviceManager;
pub use event_bus::{EventBus, EventObserver, OrionEvent, OrionEventKind};
pub use oracle::{EditScript, OracleVerdict, PlanningOracle};
