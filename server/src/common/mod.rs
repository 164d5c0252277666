pub mod errors;

pub use errors::{ServiceBusError, ServiceBusResult};
