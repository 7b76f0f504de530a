use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::services::process::run_inherited;
use crate::backup::services::CommandService;

use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

/// Splits a `command` entry source into argv.
pub fn split_command(source: &str) -> Vec<String> {
    source.split_whitespace().map(str::to_string).collect()
}

impl CommandService for CommandRunner {
    fn run(&self, argv: &[String], cwd: &Path) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::configuration("Empty command line"))?;
        run_inherited(Command::new(program).args(args).current_dir(cwd))
    }
}
