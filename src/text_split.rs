//! Recursive character splitter shared by the persistence layer's embedding
//! chunking and the enrichment worker's large-chunk clean/summarize passes.
//!
//! Grounded on `original_source/db.py::_split_text_for_embedding` and
//! `original_source/ai.py::_split_big`, both thin wrappers around
//! LangChain's `RecursiveCharacterTextSplitter` with the same separator
//! list; this is a from-scratch Rust port of that splitting algorithm, not
//! a binding to the Python library.

/// Separator boundaries tried from coarsest to finest, matching the
/// original implementation's `["\n\n", "\n", ". ", "? ", "! ", " ", ""]`.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " ", ""];

/// Splits `text` into chunks of at most `chunk_size` characters, with
/// `overlap` characters of trailing context repeated at the start of the
/// next chunk. Recurses through [`SEPARATORS`] from coarsest to finest,
/// falling back to the empty separator (split anywhere) once none of the
/// coarser ones produce small enough pieces. Empty chunks (after trimming)
/// are dropped.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let pieces = split_recursive(text, chunk_size, SEPARATORS);
    merge_pieces(&pieces, chunk_size, overlap)
        .into_iter()
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Breaks `text` into pieces no larger than `chunk_size` using the first
/// separator in `separators` that actually splits it into more than one
/// piece, recursing into any still-oversized piece with the remaining
/// separators.
fn split_recursive(text: &str, chunk_size: usize, separators: &[&str]) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.to_owned()];
    }
    let Some((sep, rest)) = separators.split_first() else {
        return vec![text.to_owned()];
    };
    let parts: Vec<&str> = if sep.is_empty() {
        text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
    } else {
        text.split(sep).collect()
    };
    if parts.len() <= 1 {
        return split_recursive(text, chunk_size, rest);
    }
    let mut out = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let piece = if sep.is_empty() || i + 1 == parts.len() {
            (*part).to_owned()
        } else {
            format!("{part}{sep}")
        };
        if piece.is_empty() {
            continue;
        }
        if piece.len() > chunk_size {
            out.extend(split_recursive(&piece, chunk_size, rest));
        } else {
            out.push(piece);
        }
    }
    out
}

/// Greedily packs small pieces back together up to `chunk_size`, carrying
/// `overlap` characters of the previous chunk's tail into the next one.
fn merge_pieces(pieces: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if !current.is_empty() && current.len() + piece.len() > chunk_size {
            chunks.push(current.clone());
            let tail_start = current.len().saturating_sub(overlap);
            let tail = floor_char_boundary(&current, tail_start);
            current = current[tail..].to_owned();
        }
        current.push_str(piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(split("hello world", 2000, 200), vec!["hello world"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert_eq!(split("", 2000, 200), Vec::<String>::new());
    }

    #[test]
    fn long_text_splits_on_paragraph_boundaries_first() {
        let para_a = "a".repeat(50);
        let para_b = "b".repeat(50);
        let text = format!("{para_a}\n\n{para_b}");
        let chunks = split(&text, 60, 0);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 60 || !c.contains("\n\n")));
    }

    #[test]
    fn chunks_never_exceed_target_plus_one_separator() {
        let text = "word ".repeat(1000);
        let chunks = split(&text, 2000, 200);
        for c in &chunks {
            assert!(c.len() <= 2000 + "word ".len());
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let text = (0..500)
            .map(|i| format!("sentence{i}. "))
            .collect::<String>();
        let chunks = split(&text, 200, 50);
        assert!(chunks.len() > 1);
    }
}
