//! Feed document model, filtering, and disclosure markings.
//!
//! This module owns everything that understands RSS:
//!
//! - **Parsing**: [`FeedDocument`] splits a feed into channel metadata,
//!   items, and verbatim regions that round-trip byte for byte
//! - **Filtering**: [`FilterRule`] decides which items survive, by keyword
//!   set or regex ([`filter`])
//! - **Marking**: the [`transform`] pass stamps the channel as a filtered
//!   republication pointing back at its source
//!
//! The parse/serialize pair is deliberately conservative: everything not
//! explicitly rewritten (item bodies, namespaces, comments, CDATA, unknown
//! channel elements) is carried through untouched.

mod document;
pub mod filter;
pub mod transform;

pub use document::{DocumentError, FeedDocument, FeedItem};
pub use filter::{FilterError, FilterRule};
