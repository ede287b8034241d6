//! Core session and connection lifecycle components.
//!
//! This module contains the logic with real invariants to get right:
//!
//! - **stream**: byte-stream transport seam and the `serialport` opener
//! - **reader**: cancellable background reader, one per stream generation
//! - **session**: `SessionController` owning config, settings and the
//!   connection lifecycle, including atomic reconfigure with rollback
//!
//! # Architecture
//!
//! ```text
//! SessionController (dispatch thread)
//! ├── PortOpener ──► ByteStream (write side)
//! └── ReaderHandle (one thread per generation)
//!     └── ByteStream clone (read side) ──► mpsc ──► process_events
//! ```

pub mod reader;
pub mod session;
pub mod stream;
