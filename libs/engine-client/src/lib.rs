pub mod error;
pub mod provision;
pub mod query;
pub mod session;
pub mod transport;
pub mod util;
pub mod writer;

pub use error::EngineError;
pub use provision::{ChildOptions, Provisioner};
pub use session::{Credentials, Role, Session};
pub use transport::{EndpointConfig, EngineTransport, HttpTransport, Reply, Request, STATUS_OK};
pub use util::now_secs;
pub use writer::{
    Batch, BatchRecord, DelayHook, StreamWriter, TickRange, ValueGenerator, WritePlan,
    default_value, write_sentinel, DEFAULT_TICK_ALIGNMENT,
};
