//! Header-definition tables.
//!
//! A definition file lists one header field per line:
//!
//! ```text
//! # alias            key       type    default   comment...
//! FITS.SBR.RA        RA        string  00:00:00  ! HH:MM:SS.SSS RA pointing
//! NA                 TELESCOP  string  Subaru    ! Telescope/System which Inst. attached
//! FITS.SBR.EPOCH     EQUINOX   float   2000.0    ! Standard FK5 (years)
//! ```
//!
//! Lines starting with `#` are comments. Fields are separated by runs of whitespace
//! or `!`. An alias of `NA` marks a constant field whose default is always emitted.
//! The table is immutable once loaded and keeps file order, which is the emission
//! order of the assembled header.

use crate::error::{AppResult, PersonalityError};
use crate::value::{StatusMap, StatusValue, ValueType};
use std::path::Path;
use tracing::debug;

/// Alias marking a constant field that is never looked up.
pub const CONSTANT_ALIAS: &str = "NA";

/// One line of a definition file.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderDefinitionEntry {
    pub alias: String,
    pub output_key: String,
    pub value_type: ValueType,
    pub default_value: StatusValue,
    pub comment: String,
}

impl HeaderDefinitionEntry {
    /// True for `NA` entries.
    pub fn is_constant(&self) -> bool {
        self.alias == CONSTANT_ALIAS
    }
}

/// Ordered, immutable list of header field definitions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderDefinitionTable {
    name: String,
    entries: Vec<HeaderDefinitionEntry>,
}

impl HeaderDefinitionTable {
    /// Load a table from a definition file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PersonalityError::definition(path.display().to_string(), format!("cannot open: {}", e))
        })?;
        Self::parse(path.display().to_string(), &text)
    }

    /// Parse definition text. `source_name` only labels diagnostics.
    pub fn parse(source_name: impl Into<String>, text: &str) -> AppResult<Self> {
        let name = source_name.into();
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            if line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line
                .split(|c: char| c.is_whitespace() || c == '!')
                .filter(|f| !f.is_empty())
                .collect();
            if fields.is_empty() {
                continue;
            }
            let lineno = index + 1;
            if fields.len() < 4 {
                return Err(PersonalityError::definition(
                    &name,
                    format!(
                        "line {}: expected 'alias key type default [comment]', got {} field(s)",
                        lineno,
                        fields.len()
                    ),
                ));
            }

            let value_type = ValueType::from_name(fields[2]).ok_or_else(|| {
                PersonalityError::definition(
                    &name,
                    format!("line {}: unknown type '{}'", lineno, fields[2]),
                )
            })?;
            let default_value = value_type
                .coerce(fields[3])
                .map_err(|e| PersonalityError::definition(&name, format!("line {}: {}", lineno, e)))?;

            entries.push(HeaderDefinitionEntry {
                alias: fields[0].to_string(),
                output_key: fields[1].to_string(),
                value_type,
                default_value,
                comment: fields[4..].join(" "),
            });
        }

        debug!("Loaded {} header definitions from {}", entries.len(), name);
        Ok(Self { name, entries })
    }

    /// Source the table was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[HeaderDefinitionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Non-`NA` aliases in file order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.is_constant())
            .map(|e| e.alias.as_str())
    }

    /// Initial status dictionary: every non-`NA` alias mapped to its default.
    pub fn init_status_dictionary(&self) -> StatusMap {
        self.entries
            .iter()
            .filter(|e| !e.is_constant())
            .map(|e| (e.alias.clone(), e.default_value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TELESCOPE: &str = "\
# alias key type default comment
NA              TELESCOP  string  Subaru   ! Telescope/System which Inst. attached
FITS.SBR.RA     RA        string  00:00:00 ! HH:MM:SS.SSS RA pointing
FITS.SBR.EPOCH  EQUINOX   float   2000.0   ! Standard FK5 (years)
FITS.SBR.ZERNIKE_RMS ZRMS int     0

NA              TIMESYS   string  UTC      ! Explicit time scale specification
";

    #[test]
    fn test_parse_keeps_file_order_and_types() {
        let table = HeaderDefinitionTable::parse("tel", TELESCOPE).unwrap();
        let keys: Vec<_> = table.entries().iter().map(|e| e.output_key.as_str()).collect();
        assert_eq!(keys, ["TELESCOP", "RA", "EQUINOX", "ZRMS", "TIMESYS"]);

        let equinox = &table.entries()[2];
        assert_eq!(equinox.value_type, ValueType::Float);
        assert_eq!(equinox.default_value, StatusValue::Float(2000.0));
        assert_eq!(equinox.comment, "Standard FK5 (years)");

        assert_eq!(table.entries()[3].default_value, StatusValue::Int(0));
        assert_eq!(table.entries()[3].comment, "");
        assert_eq!(
            table.entries()[0].comment,
            "Telescope/System which Inst. attached"
        );
    }

    #[test]
    fn test_status_dictionary_has_one_entry_per_alias() {
        let table = HeaderDefinitionTable::parse("tel", TELESCOPE).unwrap();
        let dict = table.init_status_dictionary();

        assert_eq!(dict.len(), 3);
        assert!(!dict.contains_key(CONSTANT_ALIAS));
        for entry in table.entries().iter().filter(|e| !e.is_constant()) {
            assert_eq!(dict.get(&entry.alias), Some(&entry.default_value));
        }
        let aliases: Vec<_> = table.aliases().collect();
        assert_eq!(aliases, ["FITS.SBR.RA", "FITS.SBR.EPOCH", "FITS.SBR.ZERNIKE_RMS"]);
    }

    #[test]
    fn test_malformed_default_is_rejected() {
        let err = HeaderDefinitionTable::parse("bad", "FITS.X  KEY int abc ! nope\n").unwrap_err();
        assert!(matches!(err, PersonalityError::Definition { .. }));
        assert!(err.to_string().contains("line 1"));

        let err = HeaderDefinitionTable::parse("bad", "A B float 1.2.3\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_short_line_and_unknown_type_are_rejected() {
        assert!(HeaderDefinitionTable::parse("bad", "A B string\n").is_err());
        assert!(HeaderDefinitionTable::parse("bad", "A B bool true\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TELESCOPE.as_bytes()).unwrap();

        let table = HeaderDefinitionTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = HeaderDefinitionTable::load("/nonexistent/header_defs.txt").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("cannot open"));
    }
}
