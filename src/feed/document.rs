//! Verbatim-preserving RSS document model.
//!
//! An upstream feed is split into three pieces: a prologue (everything
//! through the `<channel>` open tag), an ordered list of channel child
//! nodes, and an epilogue (the `</channel>` close tag onward). Child
//! nodes the pipeline never rewrites are kept as raw byte slices of the
//! original input, so serialization reproduces them exactly instead of
//! re-prettifying the whole tree. Only the subset of RSS the filter
//! needs is given structure: the channel `<title>` and `<description>`,
//! `<item>` elements, and each item's `guid`/`title`/`description` plus
//! the first `keywords` child in any namespace.

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while parsing an upstream payload into a [`FeedDocument`].
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The payload is not valid UTF-8.
    #[error("feed is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// The XML is ill-formed.
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An entity reference could not be resolved.
    #[error("invalid entity reference: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),

    /// The document has a root element other than `<rss>`.
    #[error("root element <{0}> is not an RSS feed")]
    NotRss(String),

    /// The root `<rss>` element contains no `<channel>`.
    #[error("feed has no <channel> element")]
    NoChannel,

    /// No root element at all.
    #[error("feed document is empty")]
    EmptyDocument,

    /// Input ended before the document structure was complete.
    #[error("unexpected end of feed inside <{0}>")]
    Truncated(&'static str),
}

/// A single `<item>`, carrying both extracted fields and the verbatim
/// bytes it arrived as.
#[derive(Debug, Clone)]
pub struct FeedItem {
    /// Text of the item's `<guid>`, if present.
    pub guid: Option<String>,
    /// Text of the item's `<title>`, if present.
    pub title: Option<String>,
    /// Text of the item's `<description>`, if present.
    pub description: Option<String>,
    /// Trimmed text of the first `keywords` child in any namespace
    /// (`<itunes:keywords>`, plain `<keywords>`, ...). `None` when the
    /// element is absent, `Some("")` when present but empty.
    pub keywords: Option<String>,
    raw: String,
}

impl FeedItem {
    /// The item exactly as it appeared upstream, `<item>` tags included.
    pub fn raw_xml(&self) -> &str {
        &self.raw
    }

    /// Lowercased, trimmed keyword tokens split on commas.
    ///
    /// Empty tokens are dropped, so `"a, ,B"` yields `["a", "b"]`. An
    /// absent or empty keywords field yields nothing.
    pub fn keyword_tokens(&self) -> impl Iterator<Item = String> + '_ {
        self.keywords.iter().flat_map(|text| {
            text.split(',')
                .map(|token| token.trim().to_lowercase())
                .filter(|token| !token.is_empty())
        })
    }
}

/// A recognized simple channel element whose start tag is preserved
/// verbatim (attributes survive) while the text content can be rewritten.
#[derive(Debug, Clone)]
pub(crate) struct TextElement {
    /// Start tag exactly as written upstream, e.g. `<title lang="en">`.
    pub(crate) open: String,
    /// Inner markup in its escaped form.
    pub(crate) value: String,
    pub(crate) close: &'static str,
}

/// One direct child of `<channel>`.
#[derive(Debug, Clone)]
pub(crate) enum ChannelNode {
    Title(TextElement),
    Description(TextElement),
    Item(FeedItem),
    /// Whitespace, comments, and every element the pipeline does not
    /// rewrite, as a verbatim slice of the input.
    Raw(String),
}

/// A parsed feed ready for filtering and re-serialization.
///
/// Each upstream fetch produces a fresh instance. The serving pipeline
/// clones a document before mutating it, so cached instances are never
/// modified in place.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    prologue: String,
    children: Vec<ChannelNode>,
    epilogue: String,
    link: Option<String>,
    has_generator: bool,
    source_digest: String,
}

impl FeedDocument {
    /// Parses an RSS payload.
    ///
    /// The root element must be `<rss>` (case-insensitive) with a
    /// `<channel>` child. Items are recognized as direct `<item>`
    /// children of the channel; everything else round-trips untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] when the payload is not UTF-8, is not
    /// well-formed XML, or lacks the `<rss>`/`<channel>` structure. A
    /// failed parse never yields a partial document.
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentError> {
        let input = std::str::from_utf8(bytes)?;
        let source_digest = format!("{:x}", Sha256::digest(bytes));

        let mut reader = Reader::from_str(input);

        // Locate the <rss> root and the <channel> open tag. Everything up
        // to and including that open tag passes through as one slice.
        let mut saw_rss = false;
        let prologue = loop {
            let pos = reader.buffer_position() as usize;
            match reader.read_event()? {
                Event::Start(e) if !saw_rss => {
                    if e.local_name().as_ref().eq_ignore_ascii_case(b"rss") {
                        saw_rss = true;
                    } else {
                        return Err(DocumentError::NotRss(name_string(e.name())));
                    }
                }
                Event::Start(e) if e.name().as_ref() == b"channel" => {
                    break input[..reader.buffer_position() as usize].to_string();
                }
                Event::Start(e) => {
                    // Unexpected element between <rss> and <channel>; its
                    // bytes stay inside the prologue slice.
                    reader.read_to_end(e.name())?;
                }
                Event::Empty(e) if !saw_rss => {
                    return Err(if e.local_name().as_ref().eq_ignore_ascii_case(b"rss") {
                        DocumentError::NoChannel
                    } else {
                        DocumentError::NotRss(name_string(e.name()))
                    });
                }
                Event::Empty(e) if e.name().as_ref() == b"channel" => {
                    // Degenerate self-closed channel: reopen it so metadata
                    // insertions have somewhere to land.
                    return from_empty_channel(input, pos, &mut reader, source_digest);
                }
                Event::End(_) => return Err(DocumentError::NoChannel),
                Event::Eof => {
                    return Err(if saw_rss {
                        DocumentError::NoChannel
                    } else {
                        DocumentError::EmptyDocument
                    });
                }
                _ => {}
            }
        };

        let mut children: Vec<ChannelNode> = Vec::new();
        let mut link: Option<String> = None;
        let mut has_generator = false;
        let mut saw_title = false;
        let mut saw_description = false;

        let epilogue = loop {
            let pos = reader.buffer_position() as usize;
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.name();
                    match name.as_ref() {
                        b"title" if !saw_title => {
                            saw_title = true;
                            let element =
                                read_text_element(&mut reader, input, pos, name, "</title>")?;
                            children.push(ChannelNode::Title(element));
                        }
                        b"description" if !saw_description => {
                            saw_description = true;
                            let element = read_text_element(
                                &mut reader,
                                input,
                                pos,
                                name,
                                "</description>",
                            )?;
                            children.push(ChannelNode::Description(element));
                        }
                        b"item" => {
                            children.push(ChannelNode::Item(read_item(
                                &mut reader,
                                input,
                                pos,
                                name,
                            )?));
                        }
                        other => {
                            let open_end = reader.buffer_position() as usize;
                            if other == b"generator" {
                                has_generator = true;
                            }
                            reader.read_to_end(name)?;
                            let end = reader.buffer_position() as usize;
                            let raw = &input[pos..end];
                            if other == b"link" && link.is_none() {
                                link = Some(extract_link_text(raw, open_end - pos));
                            }
                            children.push(ChannelNode::Raw(raw.to_string()));
                        }
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"generator" {
                        has_generator = true;
                    }
                    if e.name().as_ref() == b"link" && link.is_none() {
                        link = Some(String::new());
                    }
                    let end = reader.buffer_position() as usize;
                    children.push(ChannelNode::Raw(input[pos..end].to_string()));
                }
                Event::End(e) if e.name().as_ref() == b"channel" => {
                    let epilogue = input[pos..].to_string();
                    drain_trailing(&mut reader)?;
                    break epilogue;
                }
                Event::Eof => return Err(DocumentError::Truncated("channel")),
                _ => {
                    // Text runs, CDATA, comments, processing instructions:
                    // verbatim passthrough.
                    let end = reader.buffer_position() as usize;
                    children.push(ChannelNode::Raw(input[pos..end].to_string()));
                }
            }
        };

        Ok(FeedDocument {
            prologue,
            children,
            epilogue,
            link,
            has_generator,
            source_digest,
        })
    }

    /// Serializes the document, reproducing untouched content byte for
    /// byte.
    pub fn to_xml(&self) -> String {
        let body: usize = self
            .children
            .iter()
            .map(|child| match child {
                ChannelNode::Title(t) | ChannelNode::Description(t) => {
                    t.open.len() + t.value.len() + t.close.len()
                }
                ChannelNode::Item(item) => item.raw.len(),
                ChannelNode::Raw(raw) => raw.len(),
            })
            .sum();
        let mut out = String::with_capacity(self.prologue.len() + body + self.epilogue.len());
        out.push_str(&self.prologue);
        for child in &self.children {
            match child {
                ChannelNode::Title(t) | ChannelNode::Description(t) => {
                    out.push_str(&t.open);
                    out.push_str(&t.value);
                    out.push_str(t.close);
                }
                ChannelNode::Item(item) => out.push_str(&item.raw),
                ChannelNode::Raw(raw) => out.push_str(raw),
            }
        }
        out.push_str(&self.epilogue);
        out
    }

    /// Items in upstream order.
    pub fn items(&self) -> impl Iterator<Item = &FeedItem> {
        self.children.iter().filter_map(|child| match child {
            ChannelNode::Item(item) => Some(item),
            _ => None,
        })
    }

    pub fn item_count(&self) -> usize {
        self.items().count()
    }

    /// Inner markup of the first plain `<title>` channel child.
    pub fn channel_title(&self) -> Option<&str> {
        self.children.iter().find_map(|child| match child {
            ChannelNode::Title(t) => Some(t.value.as_str()),
            _ => None,
        })
    }

    /// Inner markup of the first plain `<description>` channel child.
    pub fn channel_description(&self) -> Option<&str> {
        self.children.iter().find_map(|child| match child {
            ChannelNode::Description(t) => Some(t.value.as_str()),
            _ => None,
        })
    }

    /// Text of the first plain `<link>` channel child, if any.
    pub fn channel_link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn has_generator(&self) -> bool {
        self.has_generator
    }

    /// Hex SHA-256 of the upstream payload this document was parsed from.
    pub fn source_digest(&self) -> &str {
        &self.source_digest
    }

    /// Drops every item the predicate rejects, keeping the survivors in
    /// upstream order. Returns the number of items removed.
    pub fn retain_items(&mut self, mut keep: impl FnMut(&FeedItem) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|child| match child {
            ChannelNode::Item(item) => keep(item),
            _ => true,
        });
        before - self.children.len()
    }

    /// Mutable access to the channel title's inner markup.
    pub(crate) fn title_value_mut(&mut self) -> Option<&mut String> {
        self.children.iter_mut().find_map(|child| match child {
            ChannelNode::Title(t) => Some(&mut t.value),
            _ => None,
        })
    }

    /// Mutable access to the channel description's inner markup.
    pub(crate) fn description_value_mut(&mut self) -> Option<&mut String> {
        self.children.iter_mut().find_map(|child| match child {
            ChannelNode::Description(t) => Some(&mut t.value),
            _ => None,
        })
    }

    /// Inserts a `<description>` as the first channel child. The value is
    /// taken as already-escaped markup.
    pub(crate) fn insert_description(&mut self, value: String) {
        self.children.insert(
            0,
            ChannelNode::Description(TextElement {
                open: "<description>".to_string(),
                value,
                close: "</description>",
            }),
        );
    }

    /// Inserts a `<link>` element pointing at `url`, placed after the
    /// description when one exists, otherwise first.
    pub(crate) fn insert_link(&mut self, url: &str) {
        let element = format!("<link>{}</link>", escape(url));
        let at = self
            .children
            .iter()
            .position(|child| matches!(child, ChannelNode::Description(_)))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.children.insert(at, ChannelNode::Raw(element));
        self.link = Some(url.to_string());
    }

    /// Appends a `<generator>` element as the last channel child.
    pub(crate) fn append_generator(&mut self, text: &str) {
        self.children
            .push(ChannelNode::Raw(format!("<generator>{}</generator>", escape(text))));
        self.has_generator = true;
    }
}

fn name_string(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

/// Builds a document for the `<channel/>` form, rewriting the self-closed
/// tag into an open/close pair.
fn from_empty_channel(
    input: &str,
    pos: usize,
    reader: &mut Reader<&[u8]>,
    source_digest: String,
) -> Result<FeedDocument, DocumentError> {
    let end = reader.buffer_position() as usize;
    let tag = &input[pos..end];
    let open = match tag.strip_suffix("/>") {
        Some(stem) => format!("{}>", stem),
        None => tag.to_string(),
    };
    drain_trailing(reader)?;
    Ok(FeedDocument {
        prologue: format!("{}{}", &input[..pos], open),
        children: Vec::new(),
        epilogue: format!("</channel>{}", &input[end..]),
        link: None,
        has_generator: false,
        source_digest,
    })
}

/// Validates the remainder of the document after `</channel>`, where the
/// only structure left to close is `</rss>`.
fn drain_trailing(reader: &mut Reader<&[u8]>) -> Result<(), DocumentError> {
    let mut depth = 1usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof if depth == 0 => return Ok(()),
            Event::Eof => return Err(DocumentError::Truncated("rss")),
            _ => {}
        }
    }
}

/// Captures a recognized simple element: the start tag verbatim plus the
/// inner markup, un-unescaped.
fn read_text_element(
    reader: &mut Reader<&[u8]>,
    input: &str,
    pos: usize,
    name: QName<'_>,
    close: &'static str,
) -> Result<TextElement, DocumentError> {
    let open_end = reader.buffer_position() as usize;
    let value = reader.read_text(name)?.into_owned();
    Ok(TextElement {
        open: input[pos..open_end].to_string(),
        value,
        close,
    })
}

/// Captures an `<item>` subtree verbatim and extracts its filterable
/// fields from the inner markup.
fn read_item(
    reader: &mut Reader<&[u8]>,
    input: &str,
    pos: usize,
    name: QName<'_>,
) -> Result<FeedItem, DocumentError> {
    let open_end = reader.buffer_position() as usize;
    reader.read_to_end(name)?;
    let end = reader.buffer_position() as usize;
    let raw = &input[pos..end];
    // The last `<` in the slice opens the closing tag, so the inner
    // markup ends there.
    let inner_end = raw.rfind('<').unwrap_or(raw.len());
    let inner = &raw[open_end - pos..inner_end];
    parse_item(inner, raw)
}

/// Extracts `guid`, `title`, `description` and the first any-namespace
/// `keywords` child from an item's inner markup. First occurrence wins
/// for every field; only direct children are considered.
fn parse_item(inner: &str, raw: &str) -> Result<FeedItem, DocumentError> {
    let mut reader = Reader::from_str(inner);
    let mut guid: Option<String> = None;
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut keywords: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match name.as_ref() {
                    b"guid" if guid.is_none() => {
                        guid = Some(element_text(&mut reader, name)?);
                    }
                    b"title" if title.is_none() => {
                        title = Some(element_text(&mut reader, name)?);
                    }
                    b"description" if description.is_none() => {
                        description = Some(element_text(&mut reader, name)?);
                    }
                    _ if e.local_name().as_ref() == b"keywords" && keywords.is_none() => {
                        keywords = Some(element_text(&mut reader, name)?.trim().to_string());
                    }
                    _ => {
                        reader.read_to_end(name)?;
                    }
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"keywords" && keywords.is_none() {
                    keywords = Some(String::new());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(FeedItem {
        guid,
        title,
        description,
        keywords,
        raw: raw.to_string(),
    })
}

/// Flattened, unescaped text content of the element whose start tag was
/// just consumed. Nested markup contributes its text and is otherwise
/// skipped.
fn element_text(reader: &mut Reader<&[u8]>, end: QName<'_>) -> Result<String, DocumentError> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                if depth == 0 && e.name().as_ref() == end.as_ref() {
                    return Ok(text);
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(std::str::from_utf8(&c)?),
            Event::Eof => return Err(DocumentError::Truncated("item")),
            _ => {}
        }
    }
}

/// Pulls the text out of a raw `<link>...</link>` slice for the channel
/// metadata. `inner_start` is the offset just past the start tag.
fn extract_link_text(raw: &str, inner_start: usize) -> String {
    let inner_end = raw.rfind('<').unwrap_or(raw.len());
    let inner = &raw[inner_start..inner_end.max(inner_start)];
    match unescape(inner) {
        Ok(text) => text.trim().to_string(),
        Err(_) => inner.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};

    const SIMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Example Podcast</title>
    <link>https://example.com/show</link>
    <description>A show about examples.</description>
    <item>
      <title>Episode One</title>
      <guid>ep-1</guid>
      <itunes:keywords> news, Tech ,</itunes:keywords>
      <description>First episode.</description>
    </item>
    <item>
      <title>Episode Two</title>
      <guid>ep-2</guid>
      <itunes:keywords>sports</itunes:keywords>
    </item>
  </channel>
</rss>
"#;

    #[test]
    fn test_parse_extracts_channel_metadata() {
        let doc = FeedDocument::parse(SIMPLE_FEED.as_bytes()).expect("Failed to parse feed");
        assert_eq!(doc.channel_title(), Some("Example Podcast"));
        assert_eq!(doc.channel_description(), Some("A show about examples."));
        assert_eq!(doc.channel_link(), Some("https://example.com/show"));
        assert!(!doc.has_generator());
        assert_eq!(doc.item_count(), 2);
    }

    #[test]
    fn test_parse_extracts_item_fields() {
        let doc = FeedDocument::parse(SIMPLE_FEED.as_bytes()).expect("Failed to parse feed");
        let items: Vec<&FeedItem> = doc.items().collect();

        assert_eq!(items[0].guid.as_deref(), Some("ep-1"));
        assert_eq!(items[0].title.as_deref(), Some("Episode One"));
        assert_eq!(items[0].description.as_deref(), Some("First episode."));
        assert_eq!(items[0].keywords.as_deref(), Some("news, Tech ,"));
        let tokens: Vec<String> = items[0].keyword_tokens().collect();
        assert_eq!(tokens, vec!["news", "tech"]);

        assert_eq!(items[1].guid.as_deref(), Some("ep-2"));
        assert_eq!(items[1].keywords.as_deref(), Some("sports"));
        assert!(items[1].description.is_none());
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- upstream comment -->
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Round &amp; Trip</title>
    <atom:link href="https://example.com/feed" rel="self"/>
    <description><![CDATA[Show <notes> kept as-is]]></description>
    <language>en-us</language>
    <item>
      <title>Ep</title>
      <guid isPermaLink="false">g1</guid>
      <itunes:keywords>a,b</itunes:keywords>
      <enclosure url="https://example.com/1.mp3" length="123" type="audio/mpeg"/>
      <description><![CDATA[<p>HTML body</p>]]></description>
    </item>
    <unknown:extension xmlns:unknown="urn:x">  <nested attr="1">text</nested>  </unknown:extension>
  </channel>
</rss>
"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        assert_eq!(doc.to_xml(), feed);
    }

    #[test]
    fn test_retain_items_preserves_order_and_counts_removed() {
        let doc = FeedDocument::parse(SIMPLE_FEED.as_bytes()).expect("Failed to parse feed");
        let mut filtered = doc.clone();
        let removed =
            filtered.retain_items(|item| item.keyword_tokens().any(|token| token == "tech"));

        assert_eq!(removed, 1);
        assert_eq!(filtered.item_count(), 1);
        assert_eq!(
            filtered.items().next().and_then(|i| i.guid.as_deref()),
            Some("ep-1")
        );

        let output = filtered.to_xml();
        assert!(output.contains("Episode One"));
        assert!(!output.contains("Episode Two"));
        // The original instance is untouched.
        assert_eq!(doc.item_count(), 2);
    }

    #[test]
    fn test_keywords_first_direct_child_wins() {
        let feed = r#"<rss version="2.0"><channel><item>
<media:keywords xmlns:media="urn:m">first</media:keywords>
<itunes:keywords xmlns:itunes="urn:i">second</itunes:keywords>
</item></channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        let item = doc.items().next().expect("Expected one item");
        assert_eq!(item.keywords.as_deref(), Some("first"));
    }

    #[test]
    fn test_keywords_nested_in_child_element_ignored() {
        let feed = r#"<rss version="2.0"><channel><item>
<extension><itunes:keywords xmlns:itunes="urn:i">nested</itunes:keywords></extension>
</item></channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        let item = doc.items().next().expect("Expected one item");
        assert!(item.keywords.is_none());
    }

    #[test]
    fn test_empty_keywords_element_is_present_but_empty() {
        let feed = r#"<rss version="2.0"><channel>
<item><itunes:keywords xmlns:itunes="urn:i"></itunes:keywords></item>
<item><itunes:keywords xmlns:itunes="urn:i"/></item>
<item><title>none</title></item>
</channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        let items: Vec<&FeedItem> = doc.items().collect();
        assert_eq!(items[0].keywords.as_deref(), Some(""));
        assert_eq!(items[1].keywords.as_deref(), Some(""));
        assert!(items[2].keywords.is_none());
    }

    #[test]
    fn test_item_text_is_unescaped() {
        let feed = r#"<rss version="2.0"><channel><item>
<title>News &amp; Views</title>
<description><![CDATA[a < b]]></description>
</item></channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        let item = doc.items().next().expect("Expected one item");
        assert_eq!(item.title.as_deref(), Some("News & Views"));
        assert_eq!(item.description.as_deref(), Some("a < b"));
    }

    #[test]
    fn test_duplicate_channel_title_first_wins() {
        let feed = r#"<rss version="2.0"><channel><title>First</title><title>Second</title></channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        assert_eq!(doc.channel_title(), Some("First"));
        assert_eq!(doc.to_xml(), feed);
    }

    #[test]
    fn test_title_attributes_survive_round_trip() {
        let feed = r#"<rss version="2.0"><channel><title lang="en">Hi</title></channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        assert_eq!(doc.to_xml(), feed);
    }

    #[test]
    fn test_atom_link_does_not_count_as_channel_link() {
        let feed = r#"<rss version="2.0"><channel>
<atom:link xmlns:atom="http://www.w3.org/2005/Atom" href="https://example.com/feed" rel="self"/>
</channel></rss>"#;
        let doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        assert!(doc.channel_link().is_none());
    }

    #[test]
    fn test_self_closed_channel_is_reopened() {
        let feed = r#"<rss version="2.0"><channel/></rss>"#;
        let mut doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        assert_eq!(doc.item_count(), 0);
        doc.append_generator("tool");
        let output = doc.to_xml();
        assert!(output.contains("<channel><generator>tool</generator></channel>"));
        assert!(output.ends_with("</rss>"));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(matches!(
            FeedDocument::parse(b""),
            Err(DocumentError::EmptyDocument)
        ));
        assert!(matches!(
            FeedDocument::parse(b"<feed><entry/></feed>"),
            Err(DocumentError::NotRss(_))
        ));
        assert!(matches!(
            FeedDocument::parse(b"<rss version=\"2.0\"></rss>"),
            Err(DocumentError::NoChannel)
        ));
        assert!(matches!(
            FeedDocument::parse(b"<rss><channel><item>"),
            Err(DocumentError::Truncated(_) | DocumentError::Xml(_))
        ));
        assert!(FeedDocument::parse(b"<rss><channel></channel>").is_err());
        assert!(FeedDocument::parse(b"not xml at all").is_err());
        assert!(FeedDocument::parse(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_mismatched_tags_rejected() {
        let feed = b"<rss><channel><title>x</wrong></channel></rss>";
        assert!(FeedDocument::parse(feed).is_err());
    }

    #[test]
    fn test_source_digest_tracks_input_bytes() {
        let a = FeedDocument::parse(SIMPLE_FEED.as_bytes()).expect("Failed to parse feed");
        let b = FeedDocument::parse(SIMPLE_FEED.as_bytes()).expect("Failed to parse feed");
        assert_eq!(a.source_digest(), b.source_digest());

        let other = SIMPLE_FEED.replace("Episode One", "Episode 1");
        let c = FeedDocument::parse(other.as_bytes()).expect("Failed to parse feed");
        assert_ne!(a.source_digest(), c.source_digest());
    }

    #[test]
    fn test_insert_description_and_link_positions() {
        let feed = r#"<rss version="2.0"><channel><title>T</title></channel></rss>"#;
        let mut doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");

        doc.insert_description("note".to_string());
        doc.insert_link("https://example.com/src?a=1&b=2");

        let output = doc.to_xml();
        let desc_at = output.find("<description>note</description>").unwrap();
        let link_at = output
            .find("<link>https://example.com/src?a=1&amp;b=2</link>")
            .unwrap();
        let title_at = output.find("<title>").unwrap();
        assert!(desc_at < link_at);
        assert!(link_at < title_at);
        assert_eq!(doc.channel_link(), Some("https://example.com/src?a=1&b=2"));
    }

    #[test]
    fn test_items_nested_below_channel_children_pass_through() {
        // Items are only recognized as direct channel children; anything
        // deeper stays verbatim and is not filtered.
        let feed = r#"<rss version="2.0"><channel><wrapper><item><guid>x</guid></item></wrapper></channel></rss>"#;
        let mut doc = FeedDocument::parse(feed.as_bytes()).expect("Failed to parse feed");
        assert_eq!(doc.item_count(), 0);
        doc.retain_items(|_| false);
        assert!(doc.to_xml().contains("<guid>x</guid>"));
    }
}
