//! Classification of rsync output lines.
//!
//! With itemized changes enabled (`-i`), rsync prefixes each transferred
//! entry with a short change code. The classifier recognizes the codes that
//! mean real work happened and strips them before logging; everything else
//! passes through as diagnostic text. The code table is a black-box contract
//! of rsync's itemized output mode, not an attempt to parse it fully.

/// Itemized change codes that mark a successful transfer: `<f` is a file
/// sent to the remote side, `cd` is a created/changed directory. The full
/// code is the prefix plus a run of non-space characters, followed by a
/// space and the path.
const CHANGE_CODE_PREFIXES: [&str; 2] = ["<f", "cd"];

/// One line of subprocess output, consumed immediately by the log sink.
#[derive(Debug, PartialEq, Eq)]
pub enum OutputLine<'a> {
    /// A change record; the payload is the path with the code stripped.
    Change(&'a str),
    /// Anything else, passed through verbatim.
    Diagnostic(&'a str),
}

impl OutputLine<'_> {
    /// Whether this line is evidence that the run transferred something.
    pub fn is_change(&self) -> bool {
        matches!(self, OutputLine::Change(_))
    }
}

/// Classify one stdout line from the sync subprocess.
pub fn classify(line: &str) -> OutputLine<'_> {
    for prefix in CHANGE_CODE_PREFIXES {
        if !line.starts_with(prefix) {
            continue;
        }
        // The code is everything up to the first space; the rest is the path.
        if let Some(space) = line.find(' ') {
            return OutputLine::Change(&line[space + 1..]);
        }
    }
    OutputLine::Diagnostic(line)
}

/// Indent subprocess output for readability under the per-run header lines.
pub fn indent(content: &str) -> String {
    format!("    {content}")
}
