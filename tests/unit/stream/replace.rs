/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use stream::replace::{ReplaceCore, ReplaceIstream, ReplaceParser};
use stream::{StringSink, istream_string};

/// A parser that applies a fixed substitution script against
/// absolute input offsets.
struct ScriptedParser {
    position: u64,
    script: Vec<(u64, u64, Option<&'static str>)>,
}

impl ReplaceParser for ScriptedParser {
    fn parse(&mut self, core: &mut ReplaceCore, data: &[u8]) -> usize {
        let end = self.position + data.len() as u64;

        while let Some(&(start, stop, replacement)) = self.script.first() {
            if stop > end {
                break;
            }
            core.add(start, stop, replacement.map(|r| istream_string(r)));
            self.script.remove(0);
        }

        /* everything analyzed so far is final */
        let settled = self
            .script
            .first()
            .map(|&(start, _, _)| start.min(end))
            .unwrap_or(end);
        core.settle(settled);

        self.position = end;
        data.len()
    }

    fn parse_end(&mut self, core: &mut ReplaceCore) {
        core.finish();
    }
}

fn run(input: &str, script: Vec<(u64, u64, Option<&'static str>)>) -> String {
    let istream = ReplaceIstream::new(
        istream_string(input),
        ScriptedParser {
            position: 0,
            script,
        },
    );
    StringSink::new(Box::new(istream))
        .run_to_completion()
        .unwrap()
}

#[test]
fn test_no_substitutions() {
    assert_eq!(run("hello world", vec![]), "hello world");
}

#[test]
fn test_single_substitution() {
    assert_eq!(
        run("hello world", vec![(6, 11, Some("rust"))]),
        "hello rust"
    );
}

#[test]
fn test_delete_range() {
    assert_eq!(run("hello cruel world", vec![(5, 11, None)]), "hello world");
}

#[test]
fn test_multiple_ascending_substitutions() {
    assert_eq!(
        run(
            "aaa bbb ccc",
            vec![(0, 3, Some("xxx")), (4, 7, None), (8, 11, Some("zzz"))]
        ),
        "xxx  zzz"
    );
}

#[test]
fn test_insertion_at_point() {
    /* start == end inserts without consuming input */
    assert_eq!(run("ab", vec![(1, 1, Some("-"))]), "a-b");
}

#[test]
fn test_replacement_at_end() {
    assert_eq!(run("foo!", vec![(3, 4, Some("?"))]), "foo?");
}
