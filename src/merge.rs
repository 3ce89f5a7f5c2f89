//! Merging pending definitions into the sorted override database.
//!
//! The database is a text file of semicolon separated records keyed by a
//! leading hex code point, strictly ascending. Header lines (blank or starting
//! with `#`) are copied through and never compared. The merge is one forward
//! pass over the file and the pending list together; a pending record replaces
//! the original line with the same code point.

use std::io::{BufRead, Write};
use std::path::Path;

use chrono::Local;

use crate::character::{CharacterRecord, format_code_point, parse_code_point};
use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::log::LogContext;

/// Identifies who added a generated line, written as its trailing comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStamp {
    tool: String,
    source: String,
    timestamp: String,
}

impl MergeStamp {
    pub fn new(tool: impl Into<String>, source: impl Into<String>) -> Self {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Self::at(tool, source, timestamp)
    }
    pub fn at(tool: impl Into<String>, source: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self { tool: tool.into(), source: source.into(), timestamp: timestamp.into() }
    }
    pub fn comment(&self) -> String {
        format!("#{} {} User Added {}", self.tool, self.source, self.timestamp)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Pending records written, replacements included.
    pub inserted: usize,
    /// Original lines dropped in favour of a pending record.
    pub replaced: usize,
    /// Original data lines copied unchanged.
    pub copied: usize,
    pub headers: usize,
}

const LF: &[u8] = b"\n";
const CRLF: &[u8] = b"\r\n";

pub fn is_header_line(line: &str) -> bool {
    let line = line.trim_start_matches('\u{feff}').trim();
    line.is_empty() || line.starts_with('#')
}

/// The code point in front of the first semicolon of a data line.
pub fn leading_code(line: &str) -> Result<u32> {
    let (field, _) = line
        .split_once(';')
        .ok_or_else(|| InstallError::parse(format!("no fields in '{line}'"), None))?;
    parse_code_point(field.trim_start_matches('\u{feff}'))
}

fn content(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\r', '\n']).to_string()
}

pub struct OverrideFileMerger<'a> {
    stamp: &'a MergeStamp,
    log: &'a LogContext,
}

impl<'a> OverrideFileMerger<'a> {
    pub fn new(stamp: &'a MergeStamp, log: &'a LogContext) -> Self {
        Self { stamp, log }
    }

    fn generated_line(&self, record: &CharacterRecord) -> String {
        format!("{} {}", record.to_override_line(), self.stamp.comment())
    }

    /// Streams `input` into `output`, interleaving `pending`, which must be
    /// strictly ascending by code point. With nothing pending the output is a
    /// byte for byte copy of the input.
    pub fn merge<R: BufRead, W: Write>(
        &self,
        mut input: R,
        pending: &[CharacterRecord],
        mut output: W,
    ) -> Result<MergeReport> {
        if let Some(pair) = pending.windows(2).find(|w| w[0].code() >= w[1].code()) {
            return Err(InstallError::parse(
                format!(
                    "pending records out of order at U+{}",
                    format_code_point(pair[1].code())
                ),
                None,
            ));
        }
        let io = |e: std::io::Error| InstallError::Io { path: "<override database>".into(), source: e };
        let mut report = MergeReport::default();
        let mut terminator: Option<&'static [u8]> = None;
        // only the last line of a file can lack its terminator
        let mut unterminated = false;
        let mut next = 0;
        let mut previous: Option<u32> = None;
        let mut raw = Vec::new();
        let mut line_no = 0;

        loop {
            raw.clear();
            if input.read_until(b'\n', &mut raw).map_err(io)? == 0 {
                break;
            }
            line_no += 1;
            if terminator.is_none() && raw.ends_with(b"\n") {
                terminator = Some(if raw.ends_with(CRLF) { CRLF } else { LF });
            }
            let line = content(&raw);
            if is_header_line(&line) {
                output.write_all(&raw).map_err(io)?;
                unterminated = !raw.ends_with(b"\n");
                report.headers += 1;
                continue;
            }
            let code = leading_code(&line).map_err(|e| match e {
                InstallError::Parse { message, .. } => InstallError::Parse {
                    message: format!("override database line {line_no}: {message}"),
                    line: Some(line_no),
                },
                other => other,
            })?;
            if previous.is_some_and(|p| p >= code) {
                self.log.info(format!(
                    "Override database line {line_no} (U+{}) is out of order",
                    format_code_point(code)
                ));
            }
            previous = Some(code);

            let mut replaced = false;
            while next < pending.len() && pending[next].code() <= code {
                let eol = terminator.unwrap_or(LF);
                output.write_all(self.generated_line(&pending[next]).as_bytes()).map_err(io)?;
                output.write_all(eol).map_err(io)?;
                replaced = pending[next].code() == code;
                report.inserted += 1;
                next += 1;
            }
            if replaced {
                report.replaced += 1;
                self.log.info(format!("Replacing existing override for U+{}", format_code_point(code)));
            } else {
                output.write_all(&raw).map_err(io)?;
                unterminated = !raw.ends_with(b"\n");
                report.copied += 1;
            }
        }

        let eol = terminator.unwrap_or(LF);
        for record in &pending[next..] {
            if unterminated {
                output.write_all(eol).map_err(io)?;
                unterminated = false;
            }
            output.write_all(self.generated_line(record).as_bytes()).map_err(io)?;
            output.write_all(eol).map_err(io)?;
            report.inserted += 1;
        }
        output.flush().map_err(io)?;
        Ok(report)
    }

    /// Rewrites the database at `path` in place. A missing database is treated as empty.
    pub fn merge_file<F: FileSystem>(
        &self,
        fs: &F,
        path: &Path,
        pending: &[CharacterRecord],
    ) -> Result<MergeReport> {
        let original = if fs.exists(path) {
            fs.read(path).map_err(InstallError::io(path))?
        } else {
            Vec::new()
        };
        let mut merged = Vec::with_capacity(original.len() + pending.len() * 64);
        let report = self.merge(original.as_slice(), pending, &mut merged)?;
        fs.write(path, &merged).map_err(InstallError::io(path))?;
        self.log.info(format!(
            "Merged {} definitions into {} ({} replaced, {} kept)",
            report.inserted,
            path.display(),
            report.replaced,
            report.copied
        ));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(original: &str, pending: &[CharacterRecord]) -> String {
        let stamp = MergeStamp::at("test", "chars.xml", "now");
        let log = LogContext::new();
        let mut out = Vec::new();
        OverrideFileMerger::new(&stamp, &log).merge(original.as_bytes(), pending, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn header_detection() {
        assert!(is_header_line("# UnicodeDataOverrides.txt"));
        assert!(is_header_line("\u{feff}# with bom"));
        assert!(is_header_line("   "));
        assert!(!is_header_line("E000;PUA;Co;0;L;;;;;N;;;;;"));
    }

    #[test]
    fn unterminated_last_line_gets_a_terminator_before_appending() {
        let out = merged("0010;A;Co;0;L;;;;;N;;;;;", &[CharacterRecord::new(0x20, "B")]);
        assert_eq!(out, "0010;A;Co;0;L;;;;;N;;;;;\n0020;B;Co;0;L;;;;;N;;;;; #test chars.xml User Added now\n");
    }

    #[test]
    fn crlf_files_keep_crlf() {
        let out = merged("0010;A;Co;0;L;;;;;N;;;;;\r\n", &[CharacterRecord::new(0x5, "B")]);
        assert!(out.starts_with("0005;B;"));
        assert!(out.ends_with("\r\n0010;A;Co;0;L;;;;;N;;;;;\r\n"));
    }

    #[test]
    fn unsorted_pending_is_rejected() {
        let stamp = MergeStamp::at("t", "s", "now");
        let log = LogContext::new();
        let pending = [CharacterRecord::new(0x20, "B"), CharacterRecord::new(0x10, "A")];
        let result = OverrideFileMerger::new(&stamp, &log).merge(&b""[..], &pending, Vec::new());
        assert!(result.is_err());
    }
}
