use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;

use function_name::named;
use itertools::Itertools;

use std::process::{Command, Output, Stdio};

/// Shell-like rendering of a command for logs and errors.
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy())
        .join(" ")
}

fn failure(cmd: &Command, output: &Output) -> Error {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Error::Execution {
        command: describe(cmd),
        status: output.status.to_string(),
        output: text,
    }
}

/// Runs `cmd` capturing its output; a non-zero exit is an error. Returns
/// stdout.
#[named]
pub fn run_captured(cmd: &mut Command) -> Result<String> {
    tracing::debug!("Running {}", describe(cmd));
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(Error::from)
        .add_fn_name(function_path!())?;
    if !output.status.success() {
        return Err(failure(cmd, &output));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `cmd` with its output going to ours; a non-zero exit is an error.
#[named]
pub fn run_inherited(cmd: &mut Command) -> Result<()> {
    tracing::debug!("Running {}", describe(cmd));
    let status = cmd
        .stdin(Stdio::null())
        .status()
        .map_err(Error::from)
        .add_fn_name(function_path!())?;
    if !status.success() {
        return Err(Error::Execution {
            command: describe(cmd),
            status: status.to_string(),
            output: String::new(),
        });
    }

    Ok(())
}

/// Runs `cmd` silently and returns its exit code (`None` if killed by a
/// signal).
#[named]
pub fn run_exit_code(cmd: &mut Command) -> Result<Option<i32>> {
    tracing::debug!("Running {}", describe(cmd));
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(Error::from)
        .add_fn_name(function_path!())?;

    Ok(status.code())
}
