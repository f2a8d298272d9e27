/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use markup::xml::{
    XmlParser, XmlParserAttribute, XmlParserHandler, XmlParserTag, XmlTagType,
};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    TagStart(String, XmlTagType),
    TagFinished(String, XmlTagType, u64, u64),
    Attribute(String, Vec<u8>, u64, u64),
    Cdata(Vec<u8>),
}

#[derive(Default)]
struct Recorder {
    events: Vec<Event>,
    script_tags: Vec<String>,
}

impl XmlParserHandler for Recorder {
    fn on_tag_start(&mut self, tag: &XmlParserTag<'_>) -> bool {
        self.events
            .push(Event::TagStart(tag.name.to_string(), tag.tag_type));
        true
    }

    fn on_tag_finished(&mut self, tag: &XmlParserTag<'_>) -> bool {
        self.events.push(Event::TagFinished(
            tag.name.to_string(),
            tag.tag_type,
            tag.start,
            tag.end,
        ));
        true
    }

    fn enter_script_after_tag(&mut self) -> bool {
        if let Some(Event::TagFinished(name, tag_type, _, _)) = self.events.last() {
            if *tag_type == XmlTagType::Open && self.script_tags.contains(name) {
                return true;
            }
        }
        false
    }

    fn on_attribute_finished(&mut self, attr: &XmlParserAttribute<'_>) {
        self.events.push(Event::Attribute(
            attr.name.to_string(),
            attr.value.to_vec(),
            attr.value_start,
            attr.value_end,
        ));
    }

    fn on_cdata(&mut self, text: &[u8], _escaped: bool, _start: u64) -> usize {
        if let Some(Event::Cdata(buffer)) = self.events.last_mut() {
            buffer.extend_from_slice(text);
        } else {
            self.events.push(Event::Cdata(text.to_vec()));
        }
        text.len()
    }
}

fn parse(input: &[u8]) -> Recorder {
    parse_chunked(input, input.len())
}

fn parse_chunked(input: &[u8], chunk_size: usize) -> Recorder {
    let mut parser = XmlParser::new();
    let mut recorder = Recorder::default();
    recorder.script_tags.push("script".to_string());

    let mut position = 0;
    while position < input.len() {
        let end = (position + chunk_size).min(input.len());
        let consumed = parser.feed(&input[position..end], &mut recorder);
        assert!(consumed > 0);
        position += consumed;
    }

    recorder
}

#[test]
fn test_simple_tag() {
    let r = parse(b"<b>bold</b>");
    assert_eq!(
        r.events,
        vec![
            Event::TagStart("b".to_string(), XmlTagType::Open),
            Event::TagFinished("b".to_string(), XmlTagType::Open, 0, 3),
            Event::Cdata(b"bold".to_vec()),
            Event::TagStart("b".to_string(), XmlTagType::Close),
            Event::TagFinished("b".to_string(), XmlTagType::Close, 7, 11),
        ]
    );
}

#[test]
fn test_tag_names_are_lowercased() {
    let r = parse(b"<IMG/>");
    assert_eq!(
        r.events[0],
        Event::TagStart("img".to_string(), XmlTagType::Open)
    );
    assert_eq!(
        r.events[1],
        Event::TagFinished("img".to_string(), XmlTagType::Short, 0, 6)
    );
}

#[test]
fn test_quoted_attribute_offsets() {
    let r = parse(b"<a href=\"/foo\">");
    //               0123456789
    assert_eq!(
        r.events[1],
        Event::Attribute("href".to_string(), b"/foo".to_vec(), 9, 13)
    );
}

#[test]
fn test_single_quoted_attribute() {
    let r = parse(b"<a href='x y'>");
    assert_eq!(
        r.events[1],
        Event::Attribute("href".to_string(), b"x y".to_vec(), 9, 12)
    );
}

#[test]
fn test_unquoted_attribute_compat() {
    let r = parse(b"<a href=foo >");
    assert_eq!(
        r.events[1],
        Event::Attribute("href".to_string(), b"foo".to_vec(), 8, 11)
    );
}

#[test]
fn test_attribute_without_value() {
    let r = parse(b"<input disabled>");
    assert_eq!(
        r.events[1],
        Event::Attribute("disabled".to_string(), b"".to_vec(), 15, 15)
    );
}

#[test]
fn test_processing_instruction() {
    let r = parse(b"<?cm4all-rewrite-uri c:mode=\"direct\"?>");
    assert_eq!(
        r.events[0],
        Event::TagStart("cm4all-rewrite-uri".to_string(), XmlTagType::Pi)
    );
}

#[test]
fn test_comment_is_skipped() {
    let r = parse(b"a<!-- <b> -->z");

    /* the comment produces no events, so the surrounding character
       data runs together */
    assert_eq!(r.events, vec![Event::Cdata(b"az".to_vec())]);
}

#[test]
fn test_cdata_section() {
    let r = parse(b"<![CDATA[x < y]]>done");
    assert_eq!(r.events, vec![Event::Cdata(b"x < ydone".to_vec())]);
}

#[test]
fn test_script_mode_hides_markup() {
    let r = parse(b"<script>if (a < b) { x(); }</script>after");

    /* nothing between <script> and </script> is tokenized */
    let tag_events: Vec<&Event> = r
        .events
        .iter()
        .filter(|e| matches!(e, Event::TagStart(..)))
        .collect();
    assert_eq!(tag_events.len(), 2);

    assert!(
        r.events
            .contains(&Event::Cdata(b"if (a < b) { x(); }".to_vec()))
    );
}

#[test]
fn test_script_mode_keeps_embedded_element_text() {
    let r = parse(b"<script><c:widget id=\"foo\"/></script>");

    /* the embedded element is delivered as plain character data */
    let cdata: Vec<u8> = r
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Cdata(text) => Some(text.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(cdata, b"<c:widget id=\"foo\"/>".to_vec());
}

#[test]
fn test_chunked_input_equivalence() {
    let input: &[u8] = b"<div class=\"x\"><a href=\"/y\">text</a><!-- c --></div>";

    let whole = parse(input);
    for chunk_size in [1, 2, 3, 7] {
        let chunked = parse_chunked(input, chunk_size);
        assert_eq!(whole.events, chunked.events, "chunk size {}", chunk_size);
    }
}

#[test]
fn test_overlong_name_degrades_gracefully() {
    let mut input = Vec::from(&b"<"[..]);
    input.extend_from_slice(&[b'x'; 100]);
    input.extend_from_slice(b" a=\"1\">rest");

    /* no tag events for the overlong name, but parsing continues */
    let r = parse(&input);
    assert!(
        r.events
            .iter()
            .all(|e| !matches!(e, Event::TagStart(..) | Event::TagFinished(..)))
    );
    assert!(
        r.events
            .iter()
            .any(|e| matches!(e, Event::Cdata(text) if text.ends_with(b"rest")))
    );
}
