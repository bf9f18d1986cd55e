pub mod logging;
pub mod outbound;
pub mod remote_content_manager;
