//! Natural ordering for archive member names
//!
//! Names are split into alternating runs of ASCII digits and everything else.
//! Digit runs compare by numeric magnitude (leading zeros ignored), other runs
//! compare literally. When two names are equal under that rule (`page01` vs
//! `page1`) the raw byte-wise comparison decides, so the result is a strict
//! total order usable as a sort key.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Runs<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Runs<'a> {
    type Item = Run<'a>;

    fn next(&mut self) -> Option<Run<'a>> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());

        let (run, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if digits { Run::Digits(run) } else { Run::Text(run) })
    }
}

fn runs(s: &str) -> Runs<'_> {
    Runs { rest: s }
}

/// Compare two digit runs by value without parsing (no overflow on long runs)
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_runs(a: Run<'_>, b: Run<'_>) -> Ordering {
    match (a, b) {
        (Run::Digits(x), Run::Digits(y)) => compare_digits(x, y),
        (Run::Text(x), Run::Text(y)) => x.cmp(y),
        // A digit run and a text run always differ in their first character
        (Run::Digits(x), Run::Text(y)) | (Run::Text(x), Run::Digits(y)) => x.cmp(y),
    }
}

/// Natural sort comparison (`page2 < page10`, `page001 < page002 < page010`)
pub fn compare(a: &str, b: &str) -> Ordering {
    let mut left = runs(a);
    let mut right = runs(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match compare_runs(x, y) {
                Ordering::Equal => continue,
                ord => return ord,
            },
        }
    }

    // Same natural key (differs only in zero padding): raw order breaks the tie
    a.cmp(b)
}

/// Sort member names in place using natural order
pub fn sort_natural(names: &mut [String]) {
    names.sort_by(|a, b| compare(a, b));
}
