//! A simulated browser page for `glue-js` guests.
//!
//! [`WebHost`] offers a slice of the web platform (window, document and a canvas element,
//! `localStorage`, the clipboard, the console, timers, animation frames, promises and `Date`) as
//! bridge imports. The page never runs on its own: the embedder drives its [`EventLoop`] on a
//! virtual clock, which makes guest behaviour deterministic under test.
//!
//! ```
//! use glue_js::{Bridge, GuestTable};
//! use glue_js_web::{WebConfig, WebHost};
//!
//! let page = WebHost::new(WebConfig::default());
//! let mut bridge = Bridge::with_defaults(page.imports(), GuestTable::new()).unwrap();
//! assert_eq!(page.event_loop().advance(&mut bridge, 16.0).unwrap(), 0);
//! ```

mod console;
mod event_loop;
mod host;
pub mod promise;

pub use crate::console::Console;
pub use crate::console::ConsoleEntry;
pub use crate::console::Level;
pub use crate::event_loop::EventLoop;
pub use crate::event_loop::MIN_INTERVAL_MS;
pub use crate::host::names;
pub use crate::host::WebConfig;
pub use crate::host::WebHost;
