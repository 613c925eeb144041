// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Wire format of the log profiler data stream (`.mlpd` files).
//!
//! A stream is a [`FileHeader`] followed by any number of buffer records. Each record is a
//! [`BufferHeader`] carrying the delta bases of the buffer, followed by a payload of events.
//! Every event is one tag byte (low nibble: [`wire::event_type`], high nibble: subtype flags), a
//! ULEB128 time delta and the event fields.
//!
//! - [`varint`]: LEB128 codec used by every variable-sized field.
//! - [`delta`]: the lazily-latched bases used to compress pointers, objects and methods.
//! - [`EventEncoder`] turns [`Event`] values into payload bytes, [`EventDecoder`] does the
//!   reverse for any data version up to [`wire::LOG_DATA_VERSION`].

pub mod delta;
mod decoder;
mod encoder;
mod error;
mod event;
mod header;
mod reader;
pub mod varint;
pub mod wire;

pub use decoder::{Decoded, EventDecoder, LegacyEvent, LegacyRoot, Record};
pub use encoder::EventEncoder;
pub use error::{DecodeError, HeaderError};
pub use event::{CounterDesc, CounterSample, CounterValue, Event, HeapRef};
pub use header::{read_buffer, BufferHeader, FileHeader};
pub use reader::WireReader;
