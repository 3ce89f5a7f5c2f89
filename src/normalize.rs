//! Derives the normalization compiler's override inputs from the merged database.
//!
//! Only three fields of a data line matter here: the code (first field), the
//! canonical combining class (fourth) and the decomposition (sixth). Every
//! decomposition is written as a one-way compatibility mapping, tagged or
//! not; the canonical table only receives combining classes.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::log::LogContext;
use crate::merge::is_header_line;

lazy_static! {
    static ref FIXED_FIELDS: Regex =
        Regex::new(r"^([0-9A-Fa-f]{4,6});[^;]*;[^;]*;([^;]*);[^;]*;([^;]*);").unwrap();
    static ref DECOMPOSITION_TAG: Regex = Regex::new(r"^<[^>]*>\s*").unwrap();
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizationInputs {
    /// `code:class` lines.
    pub canonical: String,
    /// `code>mapping` lines.
    pub compatibility: String,
    pub canonical_count: usize,
    pub compatibility_count: usize,
}

pub struct NormalizationInputGenerator<'a> {
    log: &'a LogContext,
}

impl<'a> NormalizationInputGenerator<'a> {
    pub fn new(log: &'a LogContext) -> Self {
        Self { log }
    }

    pub fn generate(&self, database: &str) -> NormalizationInputs {
        let mut inputs = NormalizationInputs::default();
        for line in database.lines() {
            if is_header_line(line) {
                continue;
            }
            let Some(fields) = FIXED_FIELDS.captures(line) else {
                continue;
            };
            let code = &fields[1];
            let class = fields[2].trim();
            if class.parse::<u16>().is_ok_and(|c| c != 0) {
                inputs.canonical.push_str(&format!("{code}:{class}\n"));
                inputs.canonical_count += 1;
            }
            let decomposition = fields[3].trim();
            if !decomposition.is_empty() {
                let mapping = DECOMPOSITION_TAG.replace(decomposition, "");
                if !mapping.is_empty() {
                    inputs.compatibility.push_str(&format!("{code}>{mapping}\n"));
                    inputs.compatibility_count += 1;
                }
            }
        }
        inputs
    }

    /// Reads the merged database and writes both override inputs.
    pub fn generate_files<F: FileSystem>(
        &self,
        fs: &F,
        database: &Path,
        canonical: &Path,
        compatibility: &Path,
    ) -> Result<NormalizationInputs> {
        let bytes = fs.read(database).map_err(InstallError::io(database))?;
        let inputs = self.generate(&String::from_utf8_lossy(&bytes));
        let header = format!("# Generated from {}\n", file_name(database));
        fs.write(canonical, format!("{header}{}", inputs.canonical).as_bytes())
            .map_err(InstallError::io(canonical))?;
        fs.write(compatibility, format!("{header}{}", inputs.compatibility).as_bytes())
            .map_err(InstallError::io(compatibility))?;
        self.log.info(format!(
            "Wrote {} combining class and {} decomposition overrides",
            inputs.canonical_count, inputs.compatibility_count
        ));
        Ok(inputs)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_fixed_fields_and_skips_everything_else() {
        let db = "\
# header;with;semicolons;230;x;0041;
F170;MARK;Mn;230;NSM;;;;;N;;;;; #tool a.xml User Added now
F171;LIGATURE;Lo;0;L;<compat> 0066 0069;;;;N;;;;;
F172;PLAIN;Lo;0;L;F170 F171;;;;N;;;;;
F173;SHORT;Lo
F174;BOTH;Mn;9;NSM;<font>0041;;;;N;;;;;
";
        let log = LogContext::new();
        let inputs = NormalizationInputGenerator::new(&log).generate(db);
        assert_eq!(inputs.canonical, "F170:230\nF174:9\n");
        assert_eq!(inputs.compatibility, "F171>0066 0069\nF172>F170 F171\nF174>0041\n");
        assert_eq!(inputs.canonical_count, 2);
        assert_eq!(inputs.compatibility_count, 3);
    }
}
