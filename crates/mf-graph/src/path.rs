//! Variable path helpers: index groups and flattened index sets.
//!
//! Index groups follow Python conventions: `[3]`, `[-1]`, `[2:8:2]`, `[::-1]`,
//! and either `[i][j]` or `[i, j]` for multi-dimensional arrays.

use crate::error::{GraphError, GraphResult};

/// One entry of an index group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexItem {
    Single(i64),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
}

/// Split `A.c[2][1:]` into `("A.c", "[2][1:]")`.
pub fn split_index(path: &str) -> (&str, &str) {
    match path.find('[') {
        Some(pos) => (&path[..pos], &path[pos..]),
        None => (path, ""),
    }
}

fn bad(path: &str, what: impl Into<String>) -> GraphError {
    GraphError::BadIndex {
        path: path.to_string(),
        what: what.into(),
    }
}

fn parse_int(path: &str, text: &str) -> GraphResult<Option<i64>> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<i64>()
        .map(Some)
        .map_err(|_| bad(path, format!("'{text}' is not an integer")))
}

/// Parse every index group of `path`; a path without index groups yields an empty list.
pub fn parse_indices(path: &str) -> GraphResult<Vec<IndexItem>> {
    let (_, mut rest) = split_index(path);
    let mut items = Vec::new();
    while !rest.is_empty() {
        let Some(body_end) = rest.find(']') else {
            return Err(bad(path, "unterminated '['"));
        };
        if !rest.starts_with('[') {
            return Err(bad(path, "attribute access after an index is not supported"));
        }
        let body = &rest[1..body_end];
        for part in body.split(',') {
            let part = part.trim();
            let pieces: Vec<&str> = part.split(':').collect();
            let item = match pieces.as_slice() {
                [single] => IndexItem::Single(
                    parse_int(path, single)?.ok_or_else(|| bad(path, "empty index"))?,
                ),
                [start, stop] => IndexItem::Slice {
                    start: parse_int(path, start)?,
                    stop: parse_int(path, stop)?,
                    step: None,
                },
                [start, stop, step] => IndexItem::Slice {
                    start: parse_int(path, start)?,
                    stop: parse_int(path, stop)?,
                    step: parse_int(path, step)?,
                },
                _ => return Err(bad(path, format!("malformed slice '{part}'"))),
            };
            items.push(item);
        }
        rest = &rest[body_end + 1..];
    }
    Ok(items)
}

/// Positions selected by one item along an axis of length `len`.
fn axis_positions(path: &str, item: IndexItem, len: usize) -> GraphResult<Vec<usize>> {
    let n = len as i64;
    match item {
        IndexItem::Single(i) => {
            let idx = if i < 0 { i + n } else { i };
            if idx < 0 || idx >= n {
                return Err(bad(path, format!("index {i} out of range for length {len}")));
            }
            Ok(vec![idx as usize])
        }
        IndexItem::Slice { start, stop, step } => {
            let step = step.unwrap_or(1);
            if step == 0 {
                return Err(bad(path, "slice step cannot be zero"));
            }
            let norm = |v: i64, lo: i64, hi: i64| {
                let v = if v < 0 { v + n } else { v };
                v.clamp(lo, hi)
            };
            let mut out = Vec::new();
            if step > 0 {
                let mut i = start.map_or(0, |s| norm(s, 0, n));
                let end = stop.map_or(n, |s| norm(s, 0, n));
                while i < end {
                    out.push(i as usize);
                    i += step;
                }
            } else {
                let mut i = start.map_or(n - 1, |s| norm(s, -1, n - 1));
                let end = stop.map_or(-1, |s| norm(s, -1, n - 1));
                while i > end {
                    out.push(i as usize);
                    i += step;
                }
            }
            Ok(out)
        }
    }
}

/// Row-major flattened positions selected by `items` in an array of `shape`.
///
/// Trailing dimensions without an item are taken whole. A scalar (empty
/// shape) accepts no index items.
pub fn flat_indices(path: &str, items: &[IndexItem], shape: &[usize]) -> GraphResult<Vec<usize>> {
    if items.len() > shape.len() {
        return Err(bad(
            path,
            format!("{} index groups for a {}-d value", items.len(), shape.len()),
        ));
    }
    let mut flat = vec![0usize];
    for (axis, &len) in shape.iter().enumerate() {
        let positions = match items.get(axis) {
            Some(item) => axis_positions(path, *item, len)?,
            None => (0..len).collect(),
        };
        flat = flat
            .iter()
            .flat_map(|base| positions.iter().map(move |p| base * len + p))
            .collect();
    }
    Ok(flat)
}

/// True when two sorted-or-not index sets share a position.
pub fn overlaps(a: &[usize], b: &[usize]) -> bool {
    let set: std::collections::BTreeSet<usize> = a.iter().copied().collect();
    b.iter().any(|i| set.contains(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(path: &str, shape: &[usize]) -> Vec<usize> {
        flat_indices(path, &parse_indices(path).unwrap(), shape).unwrap()
    }

    #[test]
    fn split() {
        assert_eq!(split_index("A.c[2][1:]"), ("A.c", "[2][1:]"));
        assert_eq!(split_index("a.x.y"), ("a.x.y", ""));
    }

    #[test]
    fn python_slices() {
        assert_eq!(flat("x[3::]", &[6]), vec![3, 4, 5]);
        assert_eq!(flat("x[:5:]", &[6]), vec![0, 1, 2, 3, 4]);
        assert_eq!(flat("x[-1]", &[6]), vec![5]);
        assert_eq!(flat("x[::-2]", &[6]), vec![5, 3, 1]);
        assert_eq!(flat("x[1:100]", &[3]), vec![1, 2]);
    }

    #[test]
    fn multi_dimensional() {
        assert_eq!(flat("m[1]", &[2, 3]), vec![3, 4, 5]);
        assert_eq!(flat("m[:, 2]", &[2, 3]), vec![2, 5]);
        assert_eq!(flat("m[1][0]", &[2, 3]), vec![3]);
    }

    #[test]
    fn errors() {
        assert!(flat_indices("x[7]", &parse_indices("x[7]").unwrap(), &[6]).is_err());
        assert!(parse_indices("x[a]").is_err());
        assert!(flat_indices("s[0]", &parse_indices("s[0]").unwrap(), &[]).is_err());
        assert!(parse_indices("x[::0]").is_ok());
        assert!(flat_indices("x[::0]", &parse_indices("x[::0]").unwrap(), &[3]).is_err());
    }

    #[test]
    fn overlap_check() {
        assert!(overlaps(&flat("c[3::]", &[8]), &flat("c[:5:]", &[8])));
        assert!(!overlaps(&flat("c[:3]", &[8]), &flat("c[3:]", &[8])));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn slice_positions_in_range(len in 1usize..20, start in -25i64..25, stop in -25i64..25, step in prop_oneof![-4i64..-1, 1i64..5]) {
            let item = IndexItem::Slice { start: Some(start), stop: Some(stop), step: Some(step) };
            let pos = axis_positions("x", item, len).unwrap();
            prop_assert!(pos.iter().all(|p| *p < len));
            let mut dedup = pos.clone();
            dedup.sort_unstable();
            dedup.dedup();
            prop_assert_eq!(dedup.len(), pos.len());
        }
    }
}
