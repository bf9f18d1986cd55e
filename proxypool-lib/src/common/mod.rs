pub mod errors;
pub mod http;
pub mod timer;
pub mod tls;
pub mod utils;
