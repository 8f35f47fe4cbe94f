//! Disclosure markings for filtered feeds.
//!
//! A republished feed must say that it was modified and point back at
//! where the unmodified version lives. Only channel-level metadata is
//! touched: the title gains a `(Filtered)` suffix, the description is
//! prefixed with a disclosure line naming the original source, a
//! `<generator>` identifies this tool, and a `<link>` to the source is
//! added when the channel has none. Items pass through unchanged.
//!
//! Every marking is idempotent, so a feed that already carries the
//! disclosure (including our own output fed back in) is not marked
//! twice.

use quick_xml::escape::escape;

use crate::feed::document::FeedDocument;

/// Appended to the channel title, once.
const TITLE_SUFFIX: &str = " (Filtered)";
/// The suffix check ignores the leading space so upstream titles that
/// already end in `(Filtered)` are left alone.
const TITLE_MARKER: &str = "(Filtered)";

/// Default disclosure line placed at the front of the channel
/// description. `{source}` expands to the upstream feed location.
pub const DEFAULT_DISCLOSURE_TEMPLATE: &str =
    "[This is a filtered version of an RSS feed. Original source: {source}]\n\n";

const GENERATOR: &str = concat!("podsieve v", env!("CARGO_PKG_VERSION"));

/// Marks `doc` as a filtered republication of `source`.
///
/// `template` is the disclosure template; `{source}` is replaced with
/// the source location before the line is prefixed to the channel
/// description. A missing description is created as the first channel
/// child, matching where feed readers look for it.
pub fn mark_filtered(doc: &mut FeedDocument, source: &str, template: &str) {
    if let Some(title) = doc.title_value_mut() {
        if !title.is_empty() && !title.ends_with(TITLE_MARKER) {
            title.push_str(TITLE_SUFFIX);
        }
    }

    let disclosure = escape(&template.replace("{source}", source)).into_owned();
    match doc.description_value_mut() {
        Some(description) => {
            if !description.contains(&disclosure) {
                description.insert_str(0, &disclosure);
            }
        }
        None => doc.insert_description(disclosure),
    }

    if !doc.has_generator() {
        doc.append_generator(GENERATOR);
    }

    if doc.channel_link().is_none() {
        doc.insert_link(source);
    }
}
