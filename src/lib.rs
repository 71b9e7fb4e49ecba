//! Editor-side test overlay core: finds test declarations in source text,
//! matches them to reported outcomes, and turns coverage into decorations,
//! diagnostics and search results.

pub mod config;
pub mod correlate;
pub mod debounce;
pub mod diagnostics;
pub mod engine;
pub mod events;
pub mod index;
pub mod models;
pub mod overlay;
pub mod scanner;
pub mod service;
pub mod store;

pub use config::Config;
pub use engine::{DocumentView, Engine, ServiceEvent};
pub use service::{StdioService, TestService};
