//! # reportd render
//!
//! Turns a job's dashboard reference into raw pages.
//!
//! ```text
//! BackendManager (one backend per tenant)
//!   ├── chromium        → CDP screenshot of the kiosk dashboard (PNG)
//!   ├── native          → dashboard API → HTML report → chromium | wkhtmltopdf (PDF or HTML)
//!   └── image-renderer  → GET /render/d/{uid} (PNG)
//! ```

pub mod backend;
pub mod cdp;
pub mod client;
pub mod convert;
pub mod htmlgen;
pub mod manager;
pub mod page;

pub use backend::{Backend, BackendKind};
pub use client::{Dashboard, DashboardClient, Frame, Panel};
pub use convert::ConverterKind;
pub use manager::BackendManager;
pub use page::{PageKind, RenderOutput, RenderedPage};
