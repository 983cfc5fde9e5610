//! Line-level diffs between file bodies.
//!
//! Used twice: at commit time to compute per-change line statistics, and
//! when reconstructing what a commit did to each file it touched.

use serde::{Deserialize, Serialize};

use crate::commit::ChangeAction;

/// What kind of diff operation on a line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LineOp {
    /// Line exists only in the "after" version.
    Add,
    /// Line exists only in the "before" version.
    Remove,
    /// Line is identical in both versions.
    Context,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    pub op: LineOp,
    pub content: String,
    /// 1-based line number in the old body (None for Add lines).
    pub old_lineno: Option<usize>,
    /// 1-based line number in the new body (None for Remove lines).
    pub new_lineno: Option<usize>,
}

/// A contiguous block of changes within a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

/// Before/after view of one change in a commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub action: ChangeAction,
    /// Body before the commit (None for added files).
    pub before_content: Option<String>,
    /// Body after the commit (None for deleted files).
    pub after_content: Option<String>,
    pub hunks: Vec<DiffHunk>,
    pub additions: usize,
    pub deletions: usize,
}

/// Added/deleted line counts for one change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub added: u64,
    pub deleted: u64,
    /// True when the counts are the line-count delta rather than a real diff.
    pub approximate: bool,
}

/// Count lines the way editors do: a trailing newline does not start a new line.
pub fn count_lines(s: &str) -> usize {
    s.lines().count()
}

/// Line statistics between two bodies.
///
/// Runs a real line diff unless either side exceeds `max_lines`, in which
/// case the net change in line count is reported and flagged approximate.
pub fn line_stats(old: &str, new: &str, max_lines: usize) -> LineStats {
    let old_n = count_lines(old);
    let new_n = count_lines(new);

    if old_n > max_lines || new_n > max_lines {
        return LineStats {
            added: new_n.saturating_sub(old_n) as u64,
            deleted: old_n.saturating_sub(new_n) as u64,
            approximate: true,
        };
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    diff_lines(&old_lines, &new_lines)
        .iter()
        .fold(LineStats::default(), |mut stats, line| {
            match line.op {
                LineOp::Add => stats.added += 1,
                LineOp::Remove => stats.deleted += 1,
                LineOp::Context => {}
            }
            stats
        })
}

/// Tag every line of `old` and `new` as context, removal or addition.
///
/// Common leading and trailing lines are matched directly; only the
/// differing middle goes through the LCS table. The table holds the LCS
/// length of each pair of suffixes, so the script is read off front to
/// back with removals ahead of additions at each edit.
fn diff_lines(old: &[&str], new: &[&str]) -> Vec<DiffLine> {
    let head = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let tail = old[head..]
        .iter()
        .rev()
        .zip(new[head..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let (mid_old, mid_new) = (&old[head..old.len() - tail], &new[head..new.len() - tail]);

    let width = mid_new.len() + 1;
    let mut suffix = vec![0u32; (mid_old.len() + 1) * width];
    for i in (0..mid_old.len()).rev() {
        for j in (0..mid_new.len()).rev() {
            suffix[i * width + j] = if mid_old[i] == mid_new[j] {
                suffix[(i + 1) * width + j + 1] + 1
            } else {
                suffix[(i + 1) * width + j].max(suffix[i * width + j + 1])
            };
        }
    }

    let context = |oi: usize, ni: usize| DiffLine {
        op: LineOp::Context,
        content: old[oi].to_string(),
        old_lineno: Some(oi + 1),
        new_lineno: Some(ni + 1),
    };

    let mut out = Vec::with_capacity(old.len().max(new.len()));
    out.extend((0..head).map(|k| context(k, k)));

    let (mut i, mut j) = (0, 0);
    while i < mid_old.len() || j < mid_new.len() {
        if i < mid_old.len() && j < mid_new.len() && mid_old[i] == mid_new[j] {
            out.push(context(head + i, head + j));
            i += 1;
            j += 1;
        } else if i < mid_old.len()
            && (j == mid_new.len() || suffix[(i + 1) * width + j] >= suffix[i * width + j + 1])
        {
            out.push(DiffLine {
                op: LineOp::Remove,
                content: mid_old[i].to_string(),
                old_lineno: Some(head + i + 1),
                new_lineno: None,
            });
            i += 1;
        } else {
            out.push(DiffLine {
                op: LineOp::Add,
                content: mid_new[j].to_string(),
                old_lineno: None,
                new_lineno: Some(head + j + 1),
            });
            j += 1;
        }
    }

    let (old_tail, new_tail) = (old.len() - tail, new.len() - tail);
    out.extend((0..tail).map(|k| context(old_tail + k, new_tail + k)));
    out
}

/// Diff hunks between two bodies with `context_lines` of surrounding context.
pub fn compute_line_diff(old: &str, new: &str, context_lines: usize) -> Vec<DiffHunk> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    group_into_hunks(&diff_lines(&old_lines, &new_lines), context_lines)
}

fn group_into_hunks(tagged: &[DiffLine], context_lines: usize) -> Vec<DiffHunk> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (ci, _) in tagged
        .iter()
        .enumerate()
        .filter(|(_, l)| l.op != LineOp::Context)
    {
        let start = ci.saturating_sub(context_lines);
        let end = (ci + context_lines + 1).min(tagged.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            let lines = &tagged[start..end];
            // A hunk that opens on an insertion starts after the previous old
            // line, so fall back to the first line that has a number.
            let old_start = lines.iter().find_map(|l| l.old_lineno).unwrap_or(1);
            let new_start = lines.iter().find_map(|l| l.new_lineno).unwrap_or(1);
            DiffHunk {
                old_start,
                old_count: lines.iter().filter(|l| l.op != LineOp::Add).count(),
                new_start,
                new_count: lines.iter().filter(|l| l.op != LineOp::Remove).count(),
                lines: lines.to_vec(),
            }
        })
        .collect()
}

/// Count added and removed lines across hunks.
pub fn hunk_totals(hunks: &[DiffHunk]) -> (usize, usize) {
    hunks
        .iter()
        .flat_map(|h| &h.lines)
        .fold((0, 0), |(add, del), line| match line.op {
            LineOp::Add => (add + 1, del),
            LineOp::Remove => (add, del + 1),
            LineOp::Context => (add, del),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops_of(hunks: &[DiffHunk], op: LineOp) -> Vec<String> {
        hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.op == op)
            .map(|l| l.content.clone())
            .collect()
    }

    #[test]
    fn test_identical_content() {
        assert!(compute_line_diff("hello\nworld\n", "hello\nworld\n", 3).is_empty());
    }

    #[test]
    fn test_modification() {
        let hunks = compute_line_diff("line1\nline2\nline3\n", "line1\nchanged\nline3\n", 3);
        assert_eq!(hunks.len(), 1);
        assert_eq!(ops_of(&hunks, LineOp::Remove), vec!["line2"]);
        assert_eq!(ops_of(&hunks, LineOp::Add), vec!["changed"]);
        assert_eq!(hunks[0].old_count, 3);
        assert_eq!(hunks[0].new_count, 3);
    }

    #[test]
    fn test_distant_changes_split_into_hunks() {
        let old: String = (1..=20).map(|i| format!("l{i}\n")).collect();
        let new = old.replace("l2\n", "x2\n").replace("l18\n", "x18\n");
        let hunks = compute_line_diff(&old, &new, 1);
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[1].old_start, 17);
    }

    #[test]
    fn test_empty_sides() {
        let added = compute_line_diff("", "hello\nworld\n", 3);
        assert_eq!(ops_of(&added, LineOp::Add).len(), 2);
        let removed = compute_line_diff("hello\nworld\n", "", 3);
        assert_eq!(ops_of(&removed, LineOp::Remove).len(), 2);
        assert_eq!(hunk_totals(&removed), (0, 2));
    }

    #[test]
    fn test_line_stats_real_diff() {
        let s = line_stats("a\nb\nc", "a\nB\nc\nd", 100);
        assert_eq!(
            s,
            LineStats {
                added: 2,
                deleted: 1,
                approximate: false
            }
        );
    }

    #[test]
    fn test_line_stats_fallback_is_net_line_delta() {
        let s = line_stats("a\nb\nc", "x\ny\nz\nw", 2);
        assert_eq!(
            s,
            LineStats {
                added: 1,
                deleted: 0,
                approximate: true
            }
        );
    }

    #[test]
    fn test_removals_precede_additions_with_line_numbers() {
        let hunks = compute_line_diff("a\nb\nc\nd\n", "a\nx\ny\nd\n", 0);
        assert_eq!(hunks.len(), 1);
        let ops: Vec<(LineOp, Option<usize>, Option<usize>)> = hunks[0]
            .lines
            .iter()
            .map(|l| (l.op.clone(), l.old_lineno, l.new_lineno))
            .collect();
        assert_eq!(
            ops,
            vec![
                (LineOp::Remove, Some(2), None),
                (LineOp::Remove, Some(3), None),
                (LineOp::Add, None, Some(2)),
                (LineOp::Add, None, Some(3)),
            ]
        );
        assert_eq!((hunks[0].old_start, hunks[0].new_start), (2, 2));
    }

    #[test]
    fn test_stats_agree_with_hunks() {
        let old = "fn main() {\n    println!(\"hi\");\n}\n";
        let new = "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n";
        let stats = line_stats(old, new, 100);
        let (added, deleted) = hunk_totals(&compute_line_diff(old, new, 3));
        assert_eq!((stats.added, stats.deleted), (added as u64, deleted as u64));
        assert_eq!((added, deleted), (2, 1));
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("hello\nworld"), 2);
        assert_eq!(count_lines("hello\nworld\n"), 2);
    }
}
