/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use markup::css::{CssParser, CssParserHandler, CssValue};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    ClassName(Vec<u8>, u64, u64),
    XmlId(Vec<u8>),
    Block,
    Property(String, Vec<u8>, u64, u64),
    Url(Vec<u8>, u64, u64),
    Import(Vec<u8>),
}

#[derive(Default)]
struct Recorder {
    events: Vec<Event>,
}

impl CssParserHandler for Recorder {
    fn on_class_name(&mut self, name: &CssValue<'_>) {
        self.events
            .push(Event::ClassName(name.value.to_vec(), name.start, name.end));
    }

    fn on_xml_id(&mut self, id: &CssValue<'_>) {
        self.events.push(Event::XmlId(id.value.to_vec()));
    }

    fn on_block(&mut self) {
        self.events.push(Event::Block);
    }

    fn on_property_keyword(&mut self, name: &str, value: &[u8], start: u64, end: u64) {
        self.events
            .push(Event::Property(name.to_string(), value.to_vec(), start, end));
    }

    fn on_url(&mut self, url: &CssValue<'_>) {
        self.events
            .push(Event::Url(url.value.to_vec(), url.start, url.end));
    }

    fn on_import(&mut self, url: &CssValue<'_>) {
        self.events.push(Event::Import(url.value.to_vec()));
    }
}

fn parse(input: &[u8]) -> Vec<Event> {
    parse_chunked(input, input.len())
}

fn parse_chunked(input: &[u8], chunk_size: usize) -> Vec<Event> {
    let mut parser = CssParser::new(false);
    let mut recorder = Recorder::default();

    let mut position = 0;
    while position < input.len() {
        let end = (position + chunk_size).min(input.len());
        let consumed = parser.feed(&input[position..end], &mut recorder);
        assert!(consumed > 0);
        position += consumed;
    }

    recorder.events
}

#[test]
fn test_class_selector() {
    let events = parse(b".foo { }");
    //                    01234
    assert_eq!(
        events,
        vec![
            Event::ClassName(b"foo".to_vec(), 1, 4),
            Event::Block,
        ]
    );
}

#[test]
fn test_id_selector() {
    let events = parse(b"#bar{}");
    assert_eq!(
        events,
        vec![Event::XmlId(b"bar".to_vec()), Event::Block]
    );
}

#[test]
fn test_property_declaration_span() {
    let input: &[u8] = b"body { -c-mode: partial; }";
    //                   0123456789...
    let events = parse(input);

    /* the span covers the whole declaration including the
       semicolon */
    assert_eq!(
        events,
        vec![
            Event::Block,
            Event::Property("-c-mode".to_string(), b"partial".to_vec(), 7, 24),
        ]
    );
}

#[test]
fn test_quoted_url() {
    let input: &[u8] = b"a { background: url(\"image.png\"); }";
    let events = parse(input);

    assert!(matches!(
        &events[..],
        [Event::Block, Event::Url(url, _, _)] if url == b"image.png"
    ));
}

#[test]
fn test_url_quote_must_match() {
    /* an unquoted url() is not reported */
    let events = parse(b"a { background: url(image.png); }");
    assert_eq!(events, vec![Event::Block]);
}

#[test]
fn test_url_needs_word_boundary() {
    /* "xurl(" is not a url() */
    let events = parse(b"a { background: xurl(\"i.png\"); }");
    assert!(events.iter().all(|e| !matches!(e, Event::Url(..))));
}

#[test]
fn test_import() {
    let events = parse(b"@import \"style.css\";");
    assert_eq!(events, vec![Event::Import(b"style.css".to_vec())]);
}

#[test]
fn test_quoted_strings_are_opaque() {
    /* class-like tokens inside strings are ignored */
    let events = parse(b"a { content: \".fake\"; }");
    assert!(events.iter().all(|e| !matches!(e, Event::ClassName(..))));
}

#[test]
fn test_chunked_equivalence() {
    let input: &[u8] =
        b".cls { -c-view: big; background-image: url(\"x.jpg\"); }\n@import \"y.css\";";

    let whole = parse(input);
    for chunk_size in [1, 2, 3, 5, 11] {
        assert_eq!(whole, parse_chunked(input, chunk_size), "chunk {}", chunk_size);
    }
}
