pub mod pac;
pub mod probe;
pub mod proxy_conf;

pub use pac::*;
pub use probe::*;
pub use proxy_conf::*;
