mod tracing;

pub use self::tracing::{LogFormat, init_tracing, init_with};
