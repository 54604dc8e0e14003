pub mod api;
pub mod config;
pub mod driver;
pub mod http;
pub mod logging;
pub mod mock_server;
pub mod model;
pub mod overlay;
pub mod poller;
pub mod runtime;
pub mod serde_pixels;
pub mod session;
pub mod view;
