pub mod conf;
pub mod dst;
pub mod net_dialer;
pub mod queue;
pub mod registry;
pub mod sm;

pub use conf::PreWarmConfig;
pub use dst::Dst;
pub use net_dialer::TokioDialer;
pub use queue::{SizingAlgorithm, ThreadQueue};
pub use registry::{PreWarmRegistry, RegistryEntry};
pub use sm::{Conn, Dialer, PreWarmConn, State};
