//! Blob service XML documents.
//!
//! Parses `List Blobs` enumeration results and `<Error>` bodies with
//! `quick-xml`, and renders the same documents for the in-memory
//! transport.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::{BlobError, Result};
use crate::metadata::{parse_http_date, BlobEntry};

/// One page of a `List Blobs` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBlobsPage {
    /// Blobs on this page.
    pub entries: Vec<BlobEntry>,
    /// Continuation marker; `None` on the last page.
    pub next_marker: Option<String>,
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse an `<EnumerationResults>` document.
///
/// ```xml
/// <EnumerationResults ContainerName="...">
///   <Blobs>
///     <Blob>
///       <Name>a.txt</Name>
///       <Properties>
///         <Last-Modified>Mon, 19 Oct 2026 10:00:00 GMT</Last-Modified>
///         <Etag>0x8D...</Etag>
///         <Content-Length>5</Content-Length>
///         <Content-Type>text/plain</Content-Type>
///       </Properties>
///     </Blob>
///   </Blobs>
///   <NextMarker />
/// </EnumerationResults>
/// ```
pub fn parse_list_blobs(xml: &str) -> Result<ListBlobsPage> {
    // No trim_text: blob names may begin or end with spaces.
    let mut reader = Reader::from_str(xml);

    let mut page = ListBlobsPage::default();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<BlobEntry> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Blob" {
                    current = Some(BlobEntry {
                        name: String::new(),
                        size: 0,
                        last_modified: None,
                        content_type: String::new(),
                        etag: None,
                    });
                }
                stack.push(name);
            }
            Event::End(_) => {
                if stack.pop().as_deref() == Some("Blob") {
                    if let Some(entry) = current.take() {
                        page.entries.push(entry);
                    }
                }
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(malformed)?.into_owned();
                apply_text(&stack, &text, &mut current, &mut page);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                apply_text(&stack, &text, &mut current, &mut page);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(BlobError::MalformedResponse {
            message: format!("unterminated element <{}>", stack.join("/")),
        });
    }

    Ok(page)
}

/// Route a text node to the field named by the innermost open element.
fn apply_text(
    stack: &[String],
    text: &str,
    current: &mut Option<BlobEntry>,
    page: &mut ListBlobsPage,
) {
    let Some(tag) = stack.last() else {
        return;
    };

    if tag == "NextMarker" {
        if !text.trim().is_empty() {
            page.next_marker = Some(text.to_string());
        }
        return;
    }

    let Some(entry) = current.as_mut() else {
        return;
    };
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());
    match (parent, tag.as_str()) {
        (Some("Blob"), "Name") => entry.name = text.to_string(),
        (Some("Properties"), "Content-Length") => entry.size = text.trim().parse().unwrap_or(0),
        (Some("Properties"), "Content-Type") => entry.content_type = text.trim().to_string(),
        (Some("Properties"), "Last-Modified") => entry.last_modified = parse_http_date(text.trim()),
        (Some("Properties"), "Etag") => entry.etag = Some(text.trim().to_string()),
        _ => {}
    }
}

/// Extract `(Code, Message)` from an `<Error>` document, if it is one.
pub fn parse_service_error(xml: &str) -> Option<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_error = false;
    let mut tag = String::new();
    let mut code: Option<String> = None;
    let mut message = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if tag == "Error" {
                    in_error = true;
                }
            }
            Ok(Event::Text(e)) if in_error => {
                let text = e.unescape().ok()?.into_owned();
                match tag.as_str() {
                    "Code" => code = Some(text),
                    "Message" => message = text,
                    _ => {}
                }
            }
            Ok(Event::End(_)) => tag.clear(),
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    code.map(|c| (c, message))
}

fn malformed(e: quick_xml::Error) -> BlobError {
    BlobError::MalformedResponse {
        message: format!("XML parse error: {e}"),
    }
}

// ── Rendering ───────────────────────────────────────────────────────

/// Render an `<EnumerationResults>` document for one listing page.
pub fn render_list_blobs(
    container: &str,
    prefix: &str,
    marker: &str,
    entries: &[BlobEntry],
    next_marker: Option<&str>,
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("xml decl");

    let root = BytesStart::new("EnumerationResults")
        .with_attributes([("ContainerName", container)]);
    writer.write_event(Event::Start(root)).expect("start root");

    write_text_element(&mut writer, "Prefix", prefix);
    write_text_element(&mut writer, "Marker", marker);

    writer
        .write_event(Event::Start(BytesStart::new("Blobs")))
        .expect("start Blobs");
    for entry in entries {
        writer
            .write_event(Event::Start(BytesStart::new("Blob")))
            .expect("start Blob");
        write_text_element(&mut writer, "Name", &entry.name);

        let last_modified = entry
            .last_modified
            .map(|d| httpdate::fmt_http_date(d.into()))
            .unwrap_or_default();
        let size = entry.size.to_string();
        let etag = entry.etag.clone().unwrap_or_default();
        write_simple_element_group(
            &mut writer,
            "Properties",
            &[
                ("Last-Modified", &last_modified),
                ("Etag", &etag),
                ("Content-Length", &size),
                ("Content-Type", &entry.content_type),
                ("BlobType", "BlockBlob"),
            ],
        );
        writer
            .write_event(Event::End(BytesEnd::new("Blob")))
            .expect("end Blob");
    }
    writer
        .write_event(Event::End(BytesEnd::new("Blobs")))
        .expect("end Blobs");

    write_text_element(&mut writer, "NextMarker", next_marker.unwrap_or_default());

    writer
        .write_event(Event::End(BytesEnd::new("EnumerationResults")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Render an `<Error>` document.
pub fn render_error(code: &str, message: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("xml decl");

    write_simple_element_group(&mut writer, "Error", &[("Code", code), ("Message", message)]);

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const AZURE_LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="docs">
  <Prefix>.versions/a.txt/</Prefix>
  <Blobs>
    <Blob>
      <Name>.versions/a.txt/1732709123</Name>
      <Properties>
        <Creation-Time>Wed, 27 Nov 2024 12:05:23 GMT</Creation-Time>
        <Last-Modified>Wed, 27 Nov 2024 12:05:23 GMT</Last-Modified>
        <Etag>0x8DD0EAB1B2C3D4E</Etag>
        <Content-Length>5</Content-Length>
        <Content-Type>text/plain</Content-Type>
        <Content-MD5 />
        <BlobType>BlockBlob</BlobType>
      </Properties>
      <Metadata><Name>ignored</Name></Metadata>
    </Blob>
    <Blob>
      <Name>.versions/a.txt/1732709200</Name>
      <Properties>
        <Content-Length>0</Content-Length>
        <Content-Type />
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker>2!96!MDAwMDEx</NextMarker>
</EnumerationResults>"#;

    #[test]
    fn test_parse_azure_listing() {
        let page = parse_list_blobs(AZURE_LISTING).unwrap();
        assert_eq!(page.entries.len(), 2);

        let first = &page.entries[0];
        assert_eq!(first.name, ".versions/a.txt/1732709123");
        assert_eq!(first.size, 5);
        assert_eq!(first.content_type, "text/plain");
        assert_eq!(first.etag.as_deref(), Some("0x8DD0EAB1B2C3D4E"));
        assert_eq!(
            first.last_modified,
            Some(Utc.with_ymd_and_hms(2024, 11, 27, 12, 5, 23).unwrap())
        );

        let second = &page.entries[1];
        assert_eq!(second.name, ".versions/a.txt/1732709200");
        assert_eq!(second.size, 0);
        assert_eq!(second.content_type, "");

        assert_eq!(page.next_marker.as_deref(), Some("2!96!MDAwMDEx"));
    }

    #[test]
    fn test_parse_empty_listing() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults ContainerName="docs"><Blobs /><NextMarker /></EnumerationResults>"#;
        let page = parse_list_blobs(xml).unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_parse_escaped_names() {
        let xml = "<EnumerationResults><Blobs><Blob><Name>a &amp; b.txt</Name></Blob></Blobs></EnumerationResults>";
        let page = parse_list_blobs(xml).unwrap();
        assert_eq!(page.entries[0].name, "a & b.txt");
    }

    #[test]
    fn test_parse_truncated_listing_fails() {
        let err = parse_list_blobs("<EnumerationResults><Blobs><Blob><Name>a</Name>").unwrap_err();
        assert!(matches!(err, BlobError::MalformedResponse { .. }));
    }

    #[test]
    fn test_render_then_parse_listing() {
        let entries = vec![BlobEntry {
            name: "dir/<odd>.txt".to_string(),
            size: 12,
            last_modified: Some(Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()),
            content_type: "text/plain".to_string(),
            etag: Some("\"abc\"".to_string()),
        }];
        let xml = render_list_blobs("docs", "dir/", "", &entries, Some("dir/z.txt"));
        let page = parse_list_blobs(&xml).unwrap();
        assert_eq!(page.entries, entries);
        assert_eq!(page.next_marker.as_deref(), Some("dir/z.txt"));
    }

    #[test]
    fn test_parse_keeps_surrounding_spaces_in_names() {
        let xml = "<EnumerationResults>\n  <Blobs>\n    <Blob>\n      <Name> padded.txt </Name>\n      <Properties>\n        <Content-Length> 3 </Content-Length>\n      </Properties>\n    </Blob>\n  </Blobs>\n  <NextMarker>\n  </NextMarker>\n</EnumerationResults>";
        let page = parse_list_blobs(xml).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].name, " padded.txt ");
        assert_eq!(page.entries[0].size, 3);
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_parse_service_error() {
        let xml = render_error("BlobNotFound", "The specified blob does not exist.");
        assert_eq!(
            parse_service_error(&xml),
            Some((
                "BlobNotFound".to_string(),
                "The specified blob does not exist.".to_string()
            ))
        );
        assert_eq!(parse_service_error(""), None);
        assert_eq!(parse_service_error("not xml at all"), None);
    }
}
