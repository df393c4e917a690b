//! 自然排序：文件名里的数字段按数值比较（q2 排在 q10 前面）

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn run_pattern() -> &'static Regex {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    RUNS.get_or_init(|| Regex::new(r"\d+|\D+").expect("静态正则"))
}

/// 把名字切成交替的数字段 / 非数字段
fn split_runs(name: &str) -> Vec<&str> {
    run_pattern().find_iter(name).map(|m| m.as_str()).collect()
}

fn is_digit_run(run: &str) -> bool {
    run.bytes().next().is_some_and(|b| b.is_ascii_digit())
}

/// 按数值比较两个数字段，任意长度都不会溢出
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// 自然顺序比较
///
/// 对应位置都是数字段时按数值比较，否则按字典序比较；
/// 前缀相同则段数少的在前；最后用整串比较兜底（`q01` 与 `q1`），保证全序。
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let runs_a = split_runs(a);
    let runs_b = split_runs(b);

    for (ra, rb) in runs_a.iter().zip(runs_b.iter()) {
        let ordering = if is_digit_run(ra) && is_digit_run(rb) {
            compare_numeric(ra, rb)
        } else {
            ra.cmp(rb)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    runs_a
        .len()
        .cmp(&runs_b.len())
        .then_with(|| a.cmp(b))
}

/// 按自然顺序原地排序（稳定排序）
pub fn sort_natural<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> String,
{
    items.sort_by(|x, y| natural_cmp(&key(x), &key(y)));
}
