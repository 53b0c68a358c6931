//! Register-level emulation of the GBA serial port plus a TCP relay tunnelled
//! through its 8-bit data register.
//!
//! This crate is platform-agnostic: it never opens sockets itself. Hosts plug a
//! [`relay::RelayConnector`] in (see `siolink-net`) and drive the port through
//! the [`mmio::SioPort`] facade.

/// Link-mode drivers and the hooks the serial unit calls on them.
pub mod driver;

/// Register addresses, bit layouts, interrupt sources and transfer timing.
pub mod hardware;

/// Bus-facing routing of the serial register block.
pub mod mmio;

/// Command-framed TCP relay behind SIODATA8.
pub mod relay;

/// RCNT/SIOCNT mode selection and driver lifecycle.
pub mod serial;

pub use driver::{DriverBus, DriverSet, DriverSlot, SioDriver};
pub use hardware::{InterruptSink, Irq};
pub use mmio::SioPort;
pub use relay::{RelayConfig, RelayConnector, RelayEngine, RelaySocket, TransferMode};
pub use serial::{SioContext, SioError, SioMode};
