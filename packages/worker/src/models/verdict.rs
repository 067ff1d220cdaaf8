/// Verdict reported when the driver never opened a verdict block.
pub const JUDGE_FAILED: &str = "judge failed";

/// Splits evaluation driver output into progress and verdict.
///
/// The first line is the job hash. A later line equal to the hash switches
/// from progress to verdict; hash lines are never reported.
#[derive(Debug, Default)]
pub struct VerdictParser {
    lines: usize,
    hash: String,
    in_verdict: bool,
    verdict: String,
}

impl VerdictParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one output line. Returns it when it is progress to report.
    pub fn feed(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        self.lines += 1;

        if self.lines == 1 {
            self.hash = line.to_string();
            return None;
        }
        if line == self.hash {
            self.in_verdict = true;
            return None;
        }
        if self.in_verdict {
            self.verdict.push_str(line);
            self.verdict.push('\n');
            None
        } else {
            Some(line.to_string())
        }
    }

    pub fn finish(self) -> String {
        if self.verdict.is_empty() {
            JUDGE_FAILED.to_string()
        } else {
            self.verdict
        }
    }
}
