//! Annotation paths: segments joined by `.`, with `\.` and `\\` escapes.

pub(crate) fn join(segments: &[String]) -> String {
    segments
        .iter()
        .map(|segment| escape(segment))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn escape(segment: &str) -> String {
    segment.replace('\\', "\\\\").replace('.', "\\.")
}

/// Split a path back into its segments. Always yields at least one segment.
pub(crate) fn split(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}
