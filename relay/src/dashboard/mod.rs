//! ==============================================================================
//! dashboard - client-side core for the soil telemetry charts
//! ==============================================================================
//!
//! layers, bottom up:
//!     buffer      bounded per-metric point buffers (append, merge, window)
//!     segment     splits a sorted series at gaps into solid + dotted traces
//!     viewport    live / historical state, y autorange, debounce
//!     render      frame building and the plotly target
//!     client      rest range loads with caching and block walking
//!     push        websocket feed from the relay
//!     controller  Dashboard: per-chart contexts and the dispatch table
//!     driver      async loop tying feed, interactions and loads together
//!
//! ==============================================================================

pub mod buffer;
pub mod client;
pub mod controller;
pub mod driver;
pub mod push;
pub mod render;
pub mod segment;
pub mod viewport;

pub use controller::{Command, Dashboard, Interaction};
pub use driver::DashboardDriver;
pub use render::{Frame, PlotlyTarget, RenderTarget};
