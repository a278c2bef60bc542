pub mod dual;
pub mod prefix;
pub mod route;
pub mod table;

pub use dual::{ActiveKind, DualState};
pub use prefix::PrefixDescriptor;
pub use route::RouteDescriptor;
pub use table::TopologyTable;
