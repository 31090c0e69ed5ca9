//! Page instrumentation used while teaching a site.
//!
//! A fetched page is prepared for the sandbox, parsed on its own thread and
//! driven by pointer events. Clicks turn into CSS selectors; the host hears
//! about them only through namespaced messages.

pub mod dom;
pub mod messages;
pub mod page;
pub mod rows;
pub mod sandbox;
pub mod selector;

pub use dom::ElementHandle;
pub use messages::{
    CatalogRow, ElementType, Envelope, HostMessage, PageMessage, Rect, Selection, NAMESPACE,
};
pub use page::{InstrumentedPage, PageHandle, PageInput, PointerEvent, PointerKind};
