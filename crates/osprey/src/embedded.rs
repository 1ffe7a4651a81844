//
// embedded.rs
//
// Derives the embedded script sub-document from a mixed-language host
// document. Script content keeps its byte offsets: everything outside
// the script regions is blanked to spaces (line breaks and tabs are
// preserved so line/column positions stay meaningful).
//

/// A half-open byte range of script content inside the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptRegion {
    pub start: usize,
    pub end: usize,
}

/// Find the content regions of `<script>` elements in markup. Markup
/// comments are skipped, so a commented-out script tag opens no region.
/// An unterminated script element extends to the end of the document.
pub fn script_regions(text: &str) -> Vec<ScriptRegion> {
    let lower = text.to_ascii_lowercase();
    let mut regions = Vec::new();
    let mut i = 0;

    while i < lower.len() {
        let Some(rel) = lower[i..].find('<') else {
            break;
        };
        let at = i + rel;

        if lower[at..].starts_with("<!--") {
            match lower[at + 4..].find("-->") {
                Some(end) => {
                    i = at + 4 + end + 3;
                    continue;
                }
                None => break,
            }
        }

        if starts_script_tag(&lower[at..]) {
            match open_tag_end(&lower, at) {
                Some(OpenTag::SelfClosing(end)) => {
                    i = end;
                    continue;
                }
                Some(OpenTag::Open(content_start)) => {
                    match lower[content_start..].find("</script") {
                        Some(close_rel) => {
                            regions.push(ScriptRegion {
                                start: content_start,
                                end: content_start + close_rel,
                            });
                            i = content_start + close_rel + "</script".len();
                        }
                        None => {
                            regions.push(ScriptRegion {
                                start: content_start,
                                end: lower.len(),
                            });
                            break;
                        }
                    }
                }
                None => break,
            }
            continue;
        }

        i = at + 1;
    }

    regions
}

/// Does the text start a `<script` open tag (as opposed to e.g.
/// `<scripted-widget>`)?
fn starts_script_tag(text: &str) -> bool {
    if !text.starts_with("<script") {
        return false;
    }
    matches!(
        text.as_bytes().get("<script".len()),
        None | Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/')
    )
}

enum OpenTag {
    /// Byte offset just past `>`.
    Open(usize),
    /// Byte offset just past `/>`.
    SelfClosing(usize),
}

/// Scan past the attributes of an open tag starting at `at`, honoring
/// quoted attribute values.
fn open_tag_end(text: &str, at: usize) -> Option<OpenTag> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    let mut j = at + "<script".len();

    while j < bytes.len() {
        let b = bytes[j];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => {
                    if j > at && bytes[j - 1] == b'/' {
                        return Some(OpenTag::SelfClosing(j + 1));
                    }
                    return Some(OpenTag::Open(j + 1));
                }
                _ => {}
            },
        }
        j += 1;
    }
    None
}

/// Produce the derived script-only document text. Byte-for-byte the same
/// length as the host text; non-script bytes become spaces except line
/// breaks and tabs.
pub fn extract_script_text(text: &str) -> String {
    let regions = script_regions(text);
    let mut out = Vec::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut region_idx = 0;

    for (i, &b) in bytes.iter().enumerate() {
        while region_idx < regions.len() && regions[region_idx].end <= i {
            region_idx += 1;
        }
        let in_script = regions
            .get(region_idx)
            .map(|r| i >= r.start && i < r.end)
            .unwrap_or(false);
        if in_script || b == b'\n' || b == b'\r' || b == b'\t' {
            out.push(b);
        } else {
            out.push(b' ');
        }
    }

    // Non-script multi-byte characters were blanked byte-by-byte to spaces,
    // so the result is valid UTF-8 of identical length.
    String::from_utf8(out).unwrap_or_else(|_| " ".repeat(text.len()))
}
