//! Parser for the backup table.
//!
//! Each effective line holds `source branch target type [options]`. Columns
//! are separated by blanks; `\ ` inside a column is a literal space.

use crate::backup::config::{effective_lines, BackupEntry, EntryType, OptionValue};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::validate::validate_branch_name;

use std::collections::BTreeMap;

const NO_OPTIONS: &str = "none";

pub fn parse_table(content: &str) -> Result<Vec<BackupEntry>> {
    effective_lines(content)
        .map(|(line_no, line)| {
            parse_line(line).add_msg(format!("Invalid backup table line {line_no}: {line:?}"))
        })
        .collect()
}

pub fn parse_line(line: &str) -> Result<BackupEntry> {
    let mut rest = line;
    let mut columns = Vec::with_capacity(4);
    for name in ["source", "branch", "target", "type"] {
        rest = rest.trim_start_matches([' ', '\t']);
        if rest.is_empty() {
            return Err(Error::configuration(format!("Missing {name} column")));
        }
        let (column, remainder) = read_column(rest)?;
        columns.push(column);
        rest = remainder;
    }

    let [source, branch, target, entry_type]: [String; 4] = columns
        .try_into()
        .map_err(|_| Error::configuration("Expected four columns"))?;

    validate_branch_name(&branch).map_err(|e| {
        Error::configuration(format!(
            "Invalid branch {branch:?}: {}",
            e.message.unwrap_or_default()
        ))
    })?;
    let entry_type: EntryType = entry_type.parse()?;
    let options = parse_options(rest.trim())?;

    Ok(BackupEntry::builder()
        .source(source)
        .branch(branch)
        .target(target)
        .entry_type(entry_type)
        .options(options)
        .build())
}

fn read_column(input: &str) -> Result<(String, &str)> {
    let mut column = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            ' ' | '\t' => return Ok((column, &input[idx..])),
            '\\' => match chars.next() {
                Some((_, ' ')) => column.push(' '),
                _ => {
                    return Err(Error::configuration(format!(
                        "Backslash at offset {idx} must escape a space"
                    )))
                }
            },
            c => column.push(c),
        }
    }

    Ok((column, ""))
}

fn parse_options(field: &str) -> Result<BTreeMap<String, OptionValue>> {
    let mut options = BTreeMap::new();
    if field.is_empty() || field == NO_OPTIONS {
        return Ok(options);
    }

    for token in field.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key.trim(), OptionValue::from(value.trim())),
            None => (token, OptionValue::Flag(true)),
        };
        if options.insert(key.to_string(), value).is_some() {
            return Err(Error::configuration(format!("Option {key:?} given twice")));
        }
    }

    Ok(options)
}
