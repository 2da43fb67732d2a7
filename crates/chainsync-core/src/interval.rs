//! Set arithmetic over closed block ranges.
//!
//! An interval `(start, end)` covers every block number `n` with
//! `start <= n <= end`. A set of intervals is "normalised" when it is sorted
//! by start and no two intervals overlap or touch; [`union`] normalises.

/// Closed block range `(start, end)`, `start <= end`.
pub type Interval = (u64, u64);

/// Number of block numbers covered by a set of intervals.
///
/// Overlapping input is counted once.
pub fn sum(intervals: &[Interval]) -> u64 {
    union(intervals).iter().map(|(s, e)| e - s + 1).sum()
}

/// Sort and merge overlapping or adjacent intervals.
pub fn union(intervals: &[Interval]) -> Vec<Interval> {
    if intervals.is_empty() {
        return Vec::new();
    }
    let mut sorted = intervals.to_vec();
    sorted.sort_unstable_by_key(|&(start, _)| start);

    let mut result: Vec<Interval> = Vec::with_capacity(sorted.len());
    let mut current = sorted[0];
    for &(start, end) in &sorted[1..] {
        if start <= current.1.saturating_add(1) {
            current.1 = current.1.max(end);
        } else {
            result.push(current);
            current = (start, end);
        }
    }
    result.push(current);
    result
}

/// Block numbers covered by both `a` and `b`.
pub fn intersection(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let a = union(a);
    let b = union(b);

    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (a_start, a_end) = a[i];
        let (b_start, b_end) = b[j];

        let start = a_start.max(b_start);
        let end = a_end.min(b_end);
        if start <= end {
            result.push((start, end));
        }

        if a_end < b_end {
            i += 1;
        } else {
            j += 1;
        }
    }
    union(&result)
}

/// Intersection of every list. An empty input yields an empty set.
pub fn intersection_many(lists: &[Vec<Interval>]) -> Vec<Interval> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    rest.iter()
        .fold(union(first), |acc, list| intersection(&acc, list))
}

/// Block numbers covered by `initial` but not by `remove`.
pub fn difference(initial: &[Interval], remove: &[Interval]) -> Vec<Interval> {
    let initial = union(initial);
    let remove = union(remove);

    let mut result = Vec::new();
    let mut j = 0;
    for &(start, end) in &initial {
        let mut cursor = start;
        let mut exhausted = false;

        // skip removals that end before this interval
        while j < remove.len() && remove[j].1 < cursor {
            j += 1;
        }

        let mut k = j;
        while k < remove.len() && remove[k].0 <= end {
            let (r_start, r_end) = remove[k];
            if r_start > cursor {
                result.push((cursor, r_start - 1));
            }
            if r_end >= end {
                exhausted = true;
                break;
            }
            cursor = r_end + 1;
            k += 1;
        }
        if !exhausted {
            result.push((cursor, end));
        }
        j = k;
    }
    result
}

/// Split every interval into consecutive pieces of at most `max_chunk_size`
/// blocks, preserving order.
pub fn get_chunks(intervals: &[Interval], max_chunk_size: u64) -> Vec<Interval> {
    let size = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    for &(start, end) in intervals {
        let mut from = start;
        loop {
            let to = from.saturating_add(size - 1).min(end);
            chunks.push((from, to));
            if to == end {
                break;
            }
            from = to + 1;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(intervals: &[Interval]) -> std::collections::BTreeSet<u64> {
        intervals.iter().flat_map(|&(s, e)| s..=e).collect()
    }

    #[test]
    fn union_merges_overlapping_and_adjacent() {
        assert_eq!(union(&[(5, 8), (1, 3), (4, 4), (10, 12), (11, 20)]), vec![(1, 8), (10, 20)]);
        assert_eq!(union(&[]), Vec::<Interval>::new());
        assert_eq!(union(&[(0, 0)]), vec![(0, 0)]);
    }

    #[test]
    fn union_is_sorted_disjoint_and_exact() {
        let input = [(30, 40), (1, 2), (7, 9), (3, 3), (35, 50), (100, 100), (8, 12)];
        let out = union(&input);
        for w in out.windows(2) {
            assert!(w[0].1 + 1 < w[1].0, "{out:?} not normalised");
        }
        assert_eq!(covered(&out), covered(&input));
    }

    #[test]
    fn intersection_cases() {
        assert_eq!(intersection(&[(0, 10)], &[(5, 15)]), vec![(5, 10)]);
        assert_eq!(intersection(&[(0, 10)], &[(11, 15)]), Vec::<Interval>::new());
        assert_eq!(intersection(&[(0, 100)], &[(10, 20), (30, 40)]), vec![(10, 20), (30, 40)]);
        assert_eq!(intersection(&[], &[(1, 2)]), Vec::<Interval>::new());
        assert_eq!(intersection(&[(1, 5), (6, 9)], &[(3, 7)]), vec![(3, 7)]);
    }

    #[test]
    fn intersection_many_folds() {
        let lists = vec![vec![(0, 100)], vec![(10, 50), (60, 90)], vec![(40, 70)]];
        assert_eq!(intersection_many(&lists), vec![(40, 50), (60, 70)]);
        assert_eq!(intersection_many(&[]), Vec::<Interval>::new());
        assert_eq!(intersection_many(&[vec![(3, 1_000)]]), vec![(3, 1_000)]);
    }

    #[test]
    fn difference_cases() {
        assert_eq!(difference(&[(0, 10)], &[]), vec![(0, 10)]);
        assert_eq!(difference(&[], &[(0, 10)]), Vec::<Interval>::new());
        assert_eq!(difference(&[(0, 10)], &[(0, 10)]), Vec::<Interval>::new());
        assert_eq!(difference(&[(0, 10)], &[(3, 5)]), vec![(0, 2), (6, 10)]);
        assert_eq!(difference(&[(0, 10)], &[(0, 4)]), vec![(5, 10)]);
        assert_eq!(difference(&[(0, 10)], &[(8, 20)]), vec![(0, 7)]);
        assert_eq!(difference(&[(5, 10)], &[(0, 2), (20, 30)]), vec![(5, 10)]);
        assert_eq!(
            difference(&[(0, 10), (20, 30)], &[(5, 25)]),
            vec![(0, 4), (26, 30)]
        );
        assert_eq!(
            difference(&[(0, 20)], &[(2, 3), (6, 7), (19, 25)]),
            vec![(0, 1), (4, 5), (8, 18)]
        );
    }

    #[test]
    fn difference_and_intersection_partition_the_input() {
        let a_sets: Vec<Vec<Interval>> = vec![
            vec![(0, 50)],
            vec![(0, 3), (10, 20), (25, 25), (40, 60)],
            vec![(7, 7)],
            vec![],
        ];
        let b_sets: Vec<Vec<Interval>> = vec![
            vec![],
            vec![(0, 100)],
            vec![(2, 12), (18, 26), (59, 59)],
            vec![(7, 7), (50, 55)],
            vec![(61, 70)],
        ];
        for a in &a_sets {
            for b in &b_sets {
                let diff = difference(a, b);
                let inter = intersection(a, b);
                let mut both = covered(&diff);
                let inter_cov = covered(&inter);
                assert!(both.is_disjoint(&inter_cov));
                both.extend(inter_cov);
                assert_eq!(both, covered(a), "a={a:?} b={b:?}");
            }
        }
    }

    #[test]
    fn chunks_bound_size_and_keep_order() {
        assert_eq!(
            get_chunks(&[(0, 999)], 250),
            vec![(0, 249), (250, 499), (500, 749), (750, 999)]
        );
        assert_eq!(get_chunks(&[(0, 9), (20, 22)], 4), vec![(0, 3), (4, 7), (8, 9), (20, 22)]);
        assert_eq!(get_chunks(&[(5, 5)], 10), vec![(5, 5)]);
        assert_eq!(get_chunks(&[], 10), Vec::<Interval>::new());
    }

    #[test]
    fn sum_counts_once() {
        assert_eq!(sum(&[(0, 9), (5, 14)]), 15);
        assert_eq!(sum(&[]), 0);
    }
}
