//! Runtime glue between a WebAssembly guest and a JavaScript-style host.
//!
//! The guest can only pass integers and floats across its boundary, while the host deals in
//! strings, objects and callbacks. This crate provides:
//! - A handle table ([`HandleTable`]) that lets the guest refer to host values by integer
//! - Cached views of linear memory ([`ViewCache`]) that survive memory growth
//! - UTF-8 string transfer with a fast ASCII path ([`codec`])
//! - Descriptor-driven import dispatch ([`CallDescriptor`], [`Bridge::call`])
//! - Closure trampolines with exact-once teardown ([`Bridge::register_closure`])
//! - An error channel for host exceptions caught during fallible imports ([`ErrorChannel`])
//!
//! # Handles
//!
//! Handles `0..4` are permanent constants (`undefined`, `true`, `false`, `null`). Every other
//! handle has exactly one owner on the guest side. Passing a handle to an import with
//! [`ArgRule::Handle`] borrows it; [`ArgRule::TakeHandle`] consumes it. Using a handle after it has
//! been consumed is a [`Violation`], which poisons the bridge.
//!
//! # Memory views
//!
//! Growing linear memory replaces its buffer, and every view of the old buffer becomes detached.
//! Nothing derived from guest memory may be held across a call that can allocate; re-fetch views
//! through [`GuestMemory`] instead.
//!
//! # Exceptions
//!
//! Imports marked [`fallible`](CallDescriptor::fallible) catch host exceptions, park them in the
//! error channel and return [`BridgeError::ExceptionPending`]. Other imports let the exception
//! unwind as [`BridgeError::Throw`]. Violations are never parked: a host function that calls
//! back into the guest returns them as they are, and the bridge stays poisoned.

pub mod codec;
mod bridge;
mod closure;
mod dispatch;
mod error;
mod exn;
mod guest;
mod handle;
mod heap;
mod intrinsics;
mod memory;
mod options;
mod value;
mod view;

pub use crate::bridge::Bridge;
pub use crate::bridge::DisposeReport;
pub use crate::closure::ClosureKind;
pub use crate::closure::ClosureState;
pub use crate::closure::Teardown;
pub use crate::codec::EncodeMode;
pub use crate::codec::Encoded;
pub use crate::dispatch::ArgRule;
pub use crate::dispatch::CallDescriptor;
pub use crate::dispatch::HostImports;
pub use crate::dispatch::HostOp;
pub use crate::dispatch::ImportDecl;
pub use crate::dispatch::ImportId;
pub use crate::dispatch::RetRule;
pub use crate::dispatch::ABI_VERSION;
pub use crate::error::BridgeError;
pub use crate::error::Limit;
pub use crate::error::Violation;
pub use crate::exn::ErrorChannel;
pub use crate::guest::ExportDescriptor;
pub use crate::guest::GuestAdapter;
pub use crate::guest::GuestArg;
pub use crate::guest::GuestFn;
pub use crate::guest::GuestRet;
pub use crate::guest::GuestTable;
pub use crate::guest::WasmValue;
pub use crate::handle::Handle;
pub use crate::handle::RESERVED_HANDLES;
pub use crate::heap::HandleTable;
pub use crate::intrinsics::debug_string;
pub use crate::intrinsics::Intrinsic;
pub use crate::memory::BumpAllocator;
pub use crate::memory::GuestAllocator;
pub use crate::memory::GuestMemory;
pub use crate::memory::LinearMemory;
pub use crate::memory::MemoryBuffer;
pub use crate::memory::MAX_PAGES;
pub use crate::memory::PAGE_SIZE;
pub use crate::options::BridgeOptions;
pub use crate::value::ErrorData;
pub use crate::value::HostFunction;
pub use crate::value::HostObject;
pub use crate::value::HostValue;
pub use crate::value::JsString;
pub use crate::value::ObjectKind;
pub use crate::view::ByteView;
pub use crate::view::Element;
pub use crate::view::Float64View;
pub use crate::view::Int32View;
pub use crate::view::TypedView;
pub use crate::view::Uint8View;
pub use crate::view::ViewCache;
