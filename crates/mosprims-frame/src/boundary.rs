//! Document boundary detection.
//!
//! A document is complete once its top-level element is closed. Anything before
//! the root (XML declaration, comments, doctype) belongs to the document; text at
//! the top level that is not inside any element does not.
//!
//! The scanner is intentionally shallow: it balances tags and skips over
//! comments, CDATA sections, processing instructions and quoted attribute
//! values. Well-formedness is checked afterwards by the XML parser.

/// Result of scanning the head of a text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Nothing but whitespace.
    Empty,
    /// A document has started but is not complete yet.
    Incomplete,
    /// `text[..end]` cannot start a document and should be discarded.
    Garbage { end: usize },
    /// `text[start..end]` is one complete document.
    Complete { start: usize, end: usize },
}

/// Scan `text` for the first complete document.
pub fn scan_document(text: &str) -> Boundary {
    BoundaryScanner::default().scan(text)
}

/// Incremental form of [`scan_document`] for a growing buffer.
///
/// While the result is `Incomplete` the scanner remembers how far it got, so
/// the next call with more text appended resumes there instead of starting
/// over. Call [`reset`](Self::reset) whenever text is removed from the front
/// of the buffer.
#[derive(Debug, Clone, Default)]
pub struct BoundaryScanner {
    /// Start of the document being scanned, once its first `<` was seen.
    start: Option<usize>,
    /// Everything before this offset has been consumed.
    pos: usize,
    depth: usize,
    /// Terminator of the construct at `pos` and how many bytes of it were searched.
    searched: Option<(&'static str, usize)>,
}

impl BoundaryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn scan(&mut self, text: &str) -> Boundary {
        let start = match self.start {
            Some(start) => start,
            None => {
                let Some(start) = text.find(|c: char| !is_insignificant(c)) else {
                    return Boundary::Empty;
                };
                if !text[start..].starts_with('<') {
                    return Boundary::Garbage {
                        end: next_tag(text, start),
                    };
                }
                self.start = Some(start);
                self.pos = start;
                start
            }
        };

        loop {
            let Some(offset) = text[self.pos..].find('<') else {
                if self.depth == 0 && text[self.pos..].chars().any(|c| !is_insignificant(c)) {
                    return Boundary::Garbage { end: text.len() };
                }
                self.pos = text.len();
                return Boundary::Incomplete;
            };
            if self.depth == 0 && text[self.pos..self.pos + offset].chars().any(|c| !is_insignificant(c)) {
                // Top-level text after a prolog item.
                return Boundary::Garbage {
                    end: self.pos + offset,
                };
            }
            if offset > 0 {
                self.pos += offset;
                self.searched = None;
            }

            let pos = self.pos;
            let rest = &text[pos..];
            let consumed = if rest.starts_with("<?") {
                self.skip_past(rest, "?>")
            } else if rest.starts_with("<!--") {
                self.skip_past(rest, "-->")
            } else if rest.starts_with("<![CDATA[") {
                if self.depth == 0 {
                    return Boundary::Garbage {
                        end: skip_past(rest, "]]>").map_or(text.len(), |n| pos + n),
                    };
                }
                self.skip_past(rest, "]]>")
            } else if rest.starts_with("<!") {
                self.skip_past(rest, ">")
            } else if rest.starts_with("</") {
                let Some(n) = self.skip_past(rest, ">") else {
                    return Boundary::Incomplete;
                };
                if self.depth == 0 {
                    // Closing tag with nothing open.
                    return Boundary::Garbage { end: pos + n };
                }
                self.depth -= 1;
                if self.depth == 0 {
                    return Boundary::Complete { start, end: pos + n };
                }
                Some(n)
            } else {
                let Some((n, self_closing)) = scan_start_tag(rest) else {
                    return Boundary::Incomplete;
                };
                if self_closing {
                    if self.depth == 0 {
                        return Boundary::Complete { start, end: pos + n };
                    }
                } else {
                    self.depth += 1;
                }
                Some(n)
            };

            let Some(n) = consumed else {
                return Boundary::Incomplete;
            };
            self.pos += n;
            self.searched = None;
        }
    }

    /// Length of `rest` up to and including `terminator`, skipping the part
    /// searched by earlier calls.
    fn skip_past(&mut self, rest: &str, terminator: &'static str) -> Option<usize> {
        let mut from = match self.searched {
            Some((searched_for, n)) if searched_for == terminator => n.min(rest.len()),
            _ => 0,
        };
        while !rest.is_char_boundary(from) {
            from -= 1;
        }
        match rest[from..].find(terminator) {
            Some(n) => Some(from + n + terminator.len()),
            None => {
                // The terminator may straddle the end of what has arrived.
                self.searched = Some((terminator, rest.len().saturating_sub(terminator.len() - 1)));
                None
            }
        }
    }
}

fn is_insignificant(c: char) -> bool {
    c.is_whitespace() || c == '\u{FEFF}' || c == '\0'
}

fn next_tag(text: &str, from: usize) -> usize {
    text[from..].find('<').map_or(text.len(), |n| from + n)
}

fn skip_past(rest: &str, terminator: &str) -> Option<usize> {
    rest.find(terminator).map(|n| n + terminator.len())
}

/// Scan a start tag beginning at `rest[0] == '<'`, honouring quoted
/// attribute values. Returns the tag length and whether it self-closes.
fn scan_start_tag(rest: &str) -> Option<(usize, bool)> {
    let mut quote: Option<char> = None;
    let mut previous = '<';
    for (i, c) in rest.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '>' => return Some((i + 1, previous == '/')),
                _ => {}
            },
        }
        previous = c;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(text: &str) -> &str {
        match scan_document(text) {
            Boundary::Complete { start, end } => &text[start..end],
            other => panic!("expected complete document, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(scan_document(""), Boundary::Empty);
        assert_eq!(scan_document(" \r\n\t\u{FEFF}"), Boundary::Empty);
    }

    #[test]
    fn test_simple_document() {
        let text = "<mos><messageID>1</messageID></mos>";
        assert_eq!(complete(text), text);
    }

    #[test]
    fn test_incomplete_document() {
        assert_eq!(scan_document("<mos><heartbeat/>"), Boundary::Incomplete);
        assert_eq!(scan_document("<mos><messageID>1</mess"), Boundary::Incomplete);
        assert_eq!(scan_document("<"), Boundary::Incomplete);
        assert_eq!(scan_document("<mos attr=\"a>b"), Boundary::Incomplete);
    }

    #[test]
    fn test_concatenated_documents_split_at_first() {
        let text = "<mos><a/></mos>\r\n<mos><b/></mos>";
        assert_eq!(complete(text), "<mos><a/></mos>");
    }

    #[test]
    fn test_prolog_and_comment_belong_to_document() {
        let text = "\r\n<?xml version=\"1.0\"?><!-- hi --><mos/>";
        assert_eq!(complete(text), "<?xml version=\"1.0\"?><!-- hi --><mos/>");
    }

    #[test]
    fn test_tricky_content_does_not_close_early() {
        let text = "<mos><a x=\"</mos>\"/><!-- </mos> --><![CDATA[</mos>]]></mos>tail";
        assert_eq!(
            complete(text),
            "<mos><a x=\"</mos>\"/><!-- </mos> --><![CDATA[</mos>]]></mos>"
        );
    }

    #[test]
    fn test_leading_text_is_garbage() {
        assert_eq!(scan_document("junk<mos/>"), Boundary::Garbage { end: 4 });
        assert_eq!(scan_document("junk"), Boundary::Garbage { end: 4 });
    }

    #[test]
    fn test_stray_end_tag_is_garbage() {
        assert_eq!(scan_document("</mos><mos/>"), Boundary::Garbage { end: 6 });
    }

    #[test]
    fn test_text_after_prolog_is_garbage() {
        assert_eq!(
            scan_document("<?xml version=\"1.0\"?>oops<mos/>"),
            Boundary::Garbage { end: 25 }
        );
    }

    #[test]
    fn test_scanner_resumes_where_it_stopped() {
        let mut scanner = BoundaryScanner::new();
        let mut text = String::from("<mos><roStorySend><storyBody>");
        assert_eq!(scanner.scan(&text), Boundary::Incomplete);
        let resumed_at = scanner.pos;
        assert_eq!(resumed_at, text.len());

        text.push_str(&"lorem ipsum ".repeat(1000));
        assert_eq!(scanner.scan(&text), Boundary::Incomplete);
        assert!(scanner.pos > resumed_at);

        text.push_str("<!-- a long comment ");
        assert_eq!(scanner.scan(&text), Boundary::Incomplete);
        text.push_str("still going -");
        assert_eq!(scanner.scan(&text), Boundary::Incomplete);
        text.push_str("-></storyBody></roStorySend></mos><mos/>");
        match scanner.scan(&text) {
            Boundary::Complete { start, end } => {
                assert_eq!(start, 0);
                assert!(text[..end].ends_with("</roStorySend></mos>"));
            }
            other => panic!("expected complete document, got {other:?}"),
        }
    }

    #[test]
    fn test_scanner_matches_one_shot_scan_for_every_split() {
        let text = "<?xml version=\"1.0\"?><mos a='>'><b><![CDATA[</mos>]]></b><c/></mos> <x/>";
        let expected = scan_document(text);
        let Boundary::Complete { end, .. } = expected else {
            panic!("expected complete document, got {expected:?}");
        };
        for split in 1..end {
            let mut scanner = BoundaryScanner::new();
            let partial = scanner.scan(&text[..split]);
            assert!(
                matches!(partial, Boundary::Incomplete | Boundary::Empty),
                "split {split}: {partial:?}"
            );
            assert_eq!(scanner.scan(text), expected, "split {split}");
        }
    }
}
