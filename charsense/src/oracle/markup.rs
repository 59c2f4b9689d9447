// charsense/src/oracle/markup.rs
//
// HTML/XML input filter. Tag contents are mostly ASCII names and attributes
// that dilute the statistics of the actual text, so they are dropped before
// scoring. The filtered text is only used when the input really looked like
// markup; otherwise the raw bytes are scored unchanged.

use std::borrow::Cow;

const MIN_TAGS:        usize = 5;
const LONG_INPUT:      usize = 600;
const MIN_FILTERED:    usize = 100;

pub fn strip_tags(raw: &[u8]) -> Cow<'_, [u8]> {
    let mut out       = Vec::with_capacity(raw.len());
    let mut in_markup = false;
    let mut open_tags = 0usize;
    let mut bad_tags  = 0usize;

    for &b in raw {
        if b == b'<' {
            if in_markup { bad_tags += 1; }
            in_markup = true;
            open_tags += 1;
        }
        if !in_markup { out.push(b); }
        if b == b'>' { in_markup = false; }
    }

    let not_markup = open_tags < MIN_TAGS
        || open_tags / MIN_TAGS < bad_tags
        || (out.len() < MIN_FILTERED && raw.len() > LONG_INPUT);

    if not_markup { Cow::Borrowed(raw) } else { Cow::Owned(out) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_from_markup() {
        let html = b"<html><head><title>t</title></head><body><p>hello</p></body></html>";
        assert_eq!(strip_tags(html).as_ref(), b"thello");
    }

    #[test]
    fn plain_text_is_untouched() {
        let text = b"a < b and c > d";
        assert!(matches!(strip_tags(text), Cow::Borrowed(_)));
    }

    #[test]
    fn unbalanced_markup_falls_back_to_raw() {
        let text = b"<a<b<c<d<e<f<g<h<i<j<k<l>";
        assert_eq!(strip_tags(text).as_ref(), &text[..]);
    }
}
