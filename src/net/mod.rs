pub mod socket;

pub use socket::{EigrpSocket, EigrpTransport};
