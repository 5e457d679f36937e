use std::collections::HashMap;

use taskforge_core::message::TestResult;

/// Stable display order for result summaries.
const RESULT_ORDER: [TestResult; 7] = [
    TestResult::Pass,
    TestResult::Fail,
    TestResult::Error,
    TestResult::Skip,
    TestResult::Warn,
    TestResult::Cancel,
    TestResult::Interrupted,
];

/// One console line for a completed test.
pub fn test_line(id: &str, result: TestResult, time_elapsed: Option<f64>) -> String {
    let result = result.as_str().to_uppercase();
    match time_elapsed {
        Some(secs) => format!("{id}: {result} ({secs:.2} s)"),
        None => format!("{id}: {result}"),
    }
}

/// The final results line, e.g. `RESULTS: pass 8 | fail 1`.
pub fn summary_line(stats: &HashMap<TestResult, usize>) -> String {
    let parts: Vec<String> = RESULT_ORDER
        .iter()
        .filter_map(|result| {
            let count = stats.get(result).copied().unwrap_or(0);
            (count > 0).then(|| format!("{result} {count}"))
        })
        .collect();
    if parts.is_empty() {
        "RESULTS: none".to_string()
    } else {
        format!("RESULTS: {}", parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines() {
        assert_eq!(
            test_line("s-1-noop", TestResult::Pass, Some(0.125)),
            "s-1-noop: PASS (0.13 s)"
        );
        assert_eq!(test_line("s-2-x", TestResult::Error, None), "s-2-x: ERROR");
    }

    #[test]
    fn summary_skips_empty_buckets_and_keeps_order() {
        let mut stats = HashMap::new();
        stats.insert(TestResult::Fail, 1);
        stats.insert(TestResult::Pass, 8);
        assert_eq!(summary_line(&stats), "RESULTS: pass 8 | fail 1");
        assert_eq!(summary_line(&HashMap::new()), "RESULTS: none");
    }
}
