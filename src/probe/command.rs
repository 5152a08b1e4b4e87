//! Composite command sent to a host in a single remote-shell invocation.
//!
//! Every stage is followed by an `echo` of [`SENTINEL`], so the captured
//! stdout can be cut back into one section per stage. Stages are chained with
//! `&&` and the script ends with `; true`, which makes the remote exit status
//! meaningless for section counting.

/// Stage delimiter. Must match byte-for-byte what the parser splits on.
pub const SENTINEL: &str = "---@@@---";

pub const UPTIME_STAGE: &str = "uptime";
pub const FILESYSTEM_STAGE: &str = "df -h";
pub const MEMORY_STAGE: &str = "free -h";

/// Sections produced by the system preamble (uptime, filesystem, memory).
pub const SYSTEM_SECTIONS: usize = 3;

pub fn build_command<S: AsRef<str>>(units: &[S]) -> String {
    let mut stages: Vec<String> = Vec::with_capacity((SYSTEM_SECTIONS + units.len()) * 2);
    for stage in [UPTIME_STAGE, FILESYSTEM_STAGE, MEMORY_STAGE] {
        stages.push(stage.to_string());
        stages.push(sentinel_echo());
    }
    for unit in units {
        stages.push(unit_stage(unit.as_ref()));
        stages.push(sentinel_echo());
    }

    let mut command = stages.join(" && ");
    command.push_str("; true");
    command
}

fn unit_stage(unit: &str) -> String {
    format!("systemctl status --no-pager -- {}", shell_quote(unit))
}

fn sentinel_echo() -> String {
    format!("echo {SENTINEL}")
}

/// Quotes `value` for a POSIX shell. Plain words are returned untouched.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%_+=:,./-".contains(c));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
